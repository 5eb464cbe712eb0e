//! Execution of parsed commands against a [`System`].

use crate::cli::Command;
use crate::system::System;
use anyhow::{bail, Result};
use cronyx_core::{
    Access, BinderError, ControlSession, ParamId, ParamValue, Selector,
};
use std::fmt::Write as _;

/// Runs `command` in a session of the given `access` level and returns the
/// text to print.
pub fn execute(system: &System, access: Access, command: &Command) -> Result<String> {
    let session = ControlSession::new(system.core().clone(), access);
    match command {
        Command::Version => Ok(session.version()),
        Command::List { json } => {
            let items = session.list()?;
            if *json {
                Ok(serde_json::to_string_pretty(&items)?)
            } else {
                let mut out = String::new();
                for item in &items {
                    writeln!(out, "{item}")?;
                }
                Ok(out.trim_end().to_string())
            }
        }
        Command::Info { target } => Ok(session.item_info(Selector::parse(target))?.to_string()),
        Command::Get { target, param } => {
            let id = resolve(&session, target)?;
            let param: ParamId = param.parse()?;
            Ok(format!("{param} = {}", session.get(id, param)?))
        }
        Command::Set {
            target,
            param,
            value,
        } => {
            let id = resolve(&session, target)?;
            let param: ParamId = param.parse()?;
            let value = ParamValue::parse_for(param, value)?;
            session.set(id, param, &value)?;
            Ok(format!("{param} = {value}"))
        }
        Command::Bind { target, protocol } => {
            let id = resolve(&session, target)?;
            let name = if protocol == "none" { "" } else { protocol.as_str() };
            session.set(id, ParamId::Protocol, &ParamValue::Text(name.to_string()))?;
            Ok(format!("{target}: {}", if name.is_empty() { "unbound" } else { name }))
        }
        Command::Traffic {
            target,
            frames,
            len,
            protocol,
        } => traffic(system, &session, target, *frames, *len, protocol.as_deref()),
    }
}

fn resolve(session: &ControlSession, target: &str) -> Result<i32> {
    Ok(session.item_info(Selector::parse(target))?.id)
}

fn traffic(
    system: &System,
    session: &ControlSession,
    target: &str,
    frames: u64,
    len: usize,
    protocol: Option<&str>,
) -> Result<String> {
    if session.access() != Access::Admin {
        return Err(BinderError::PermissionDenied("traffic needs an admin session".into()).into());
    }
    let id = resolve(session, target)?;
    if let Some(protocol) = protocol {
        session.set(id, ParamId::Protocol, &ParamValue::Text(protocol.to_string()))?;
    }
    let core = system.core();
    let channel = core.item(cronyx_core::ItemId::from_i32(id)?)?;
    let Some((adapter, index)) = system.locate(&channel) else {
        bail!("{target} is not a mock channel");
    };

    let generator = adapter.start_traffic(index, Some(frames), len)?;
    let sent = generator.join();
    // Twice: handlers may raise completions while the first flush drains.
    core.flush();
    core.flush();

    let stats = session.get(id, ParamId::Statistics)?;
    Ok(format!("{target}: sent {sent} notifications; {stats}"))
}

/// Process exit code for a failed command.
///
/// Binder errors map onto their errno magnitude; anything else is 1.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<BinderError>() {
        Some(binder) => u8::try_from(binder.errno().unsigned_abs()).unwrap_or(1),
        None => 1,
    }
}

/// Short label for a failed command, used as the error line prefix.
pub fn error_label(err: &anyhow::Error) -> String {
    err.downcast_ref::<BinderError>()
        .map(|e| e.kind().to_string())
        .unwrap_or_else(|| "error".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{AdapterSpec, Topology};
    use cronyx_core::CoreConfig;

    fn system() -> System {
        let topology = Topology {
            adapters: vec![AdapterSpec {
                channels: 2,
                aliases: vec!["uplink".into()],
                protocols: vec!["".into(), "null".into()],
                ..AdapterSpec::default()
            }],
        };
        let config = CoreConfig {
            second_timer: false,
            ..CoreConfig::default()
        };
        System::build(config, &topology).unwrap()
    }

    #[test]
    fn test_list_and_info() {
        let system = system();
        let out = execute(&system, Access::ReadOnly, &Command::List { json: false }).unwrap();
        assert_eq!(out.lines().count(), 4);
        assert!(out.contains("cx0.e0.c0"));
        assert!(out.contains("alias=uplink"));

        let json = execute(&system, Access::ReadOnly, &Command::List { json: true }).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 4);

        let info = execute(
            &system,
            Access::ReadOnly,
            &Command::Info {
                target: "uplink".into(),
            },
        )
        .unwrap();
        assert!(info.contains("cx0.e0.c0"));
    }

    #[test]
    fn test_get_set_bind() {
        let system = system();
        let get = |target: &str, param: &str| {
            execute(
                &system,
                Access::Admin,
                &Command::Get {
                    target: target.into(),
                    param: param.into(),
                },
            )
        };
        assert_eq!(get("c1", "proto").unwrap(), "proto = null");
        assert_eq!(get("uplink", "proto").unwrap(), "proto = ");

        execute(
            &system,
            Access::Admin,
            &Command::Bind {
                target: "uplink".into(),
                protocol: "echo".into(),
            },
        )
        .unwrap();
        assert_eq!(get("uplink", "proto").unwrap(), "proto = echo");

        let out = execute(
            &system,
            Access::Admin,
            &Command::Set {
                target: "uplink".into(),
                param: "mtu".into(),
                value: "1500".into(),
            },
        )
        .unwrap();
        assert_eq!(out, "mtu = 1500");

        // Locked by echo.
        let err = execute(
            &system,
            Access::Admin,
            &Command::Set {
                target: "uplink".into(),
                param: "mode".into(),
                value: "async".into(),
            },
        )
        .unwrap_err();
        assert_eq!(exit_code(&err), 16);
        assert_eq!(error_label(&err), "busy");

        execute(
            &system,
            Access::Admin,
            &Command::Bind {
                target: "uplink".into(),
                protocol: "none".into(),
            },
        )
        .unwrap();
        assert_eq!(get("uplink", "proto").unwrap(), "proto = ");
    }

    #[test]
    fn test_read_only_session_refuses_changes() {
        let system = system();
        let err = execute(
            &system,
            Access::ReadOnly,
            &Command::Bind {
                target: "uplink".into(),
                protocol: "echo".into(),
            },
        )
        .unwrap_err();
        assert_eq!(error_label(&err), "permission_denied");
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn test_unknown_target_and_param() {
        let system = system();
        let err = execute(
            &system,
            Access::Admin,
            &Command::Info {
                target: "nowhere".into(),
            },
        )
        .unwrap_err();
        assert_eq!(exit_code(&err), 2);

        let err = execute(
            &system,
            Access::Admin,
            &Command::Get {
                target: "uplink".into(),
                param: "colour".into(),
            },
        )
        .unwrap_err();
        assert_eq!(exit_code(&err), 22);
    }

    #[test]
    fn test_traffic_reports_counters() {
        let system = system();
        let out = execute(
            &system,
            Access::Admin,
            &Command::Traffic {
                target: "c1".into(),
                frames: 200,
                len: 16,
                protocol: None,
            },
        )
        .unwrap();
        assert!(out.contains("sent 200"), "{out}");
        assert!(out.contains("rx=200"), "{out}");
        assert_eq!(system.null().frames(), 200);

        let err = execute(
            &system,
            Access::Admin,
            &Command::Traffic {
                target: "cx0".into(),
                frames: 1,
                len: 1,
                protocol: None,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a mock channel"));
    }
}
