use super::{
    ensure_prereqs, print_lock_report, with_spinner, LockSelection, EXIT_FAILURE, EXIT_SUCCESS,
};
use lockstep_core::{Engine, EnvLockRequest};
use lockstep_runtime::Operation;

#[derive(Debug)]
pub enum Action {
    Lock {
        selection: LockSelection,
        include_dev: bool,
    },
    Sync {
        selection: LockSelection,
        include_dev: bool,
    },
    Update {
        selection: LockSelection,
        include_dev: bool,
    },
    Run {
        args: Vec<String>,
    },
}

impl Action {
    /// Operations whose tools must be present before the action starts.
    fn operations(&self, engine: &Engine) -> Vec<Operation> {
        match self {
            Self::Lock { .. } => vec![Operation::Lock],
            Self::Sync { .. } if !engine.project().env.lock_path.is_file() => {
                vec![Operation::Lock, Operation::Sync]
            }
            Self::Sync { .. } => vec![Operation::Sync],
            Self::Update { .. } => vec![Operation::Update],
            Self::Run { .. } => vec![Operation::Run],
        }
    }
}

fn request(selection: &LockSelection, include_dev: bool) -> Result<EnvLockRequest, String> {
    Ok(EnvLockRequest {
        platforms: selection.platforms()?,
        channel_overrides: selection.channels(),
        include_dev,
    })
}

pub fn run(engine: &Engine, action: Action, json: bool) -> Result<u8, String> {
    ensure_prereqs(
        engine,
        engine.project().env.build_system,
        &action.operations(engine),
    )?;
    match action {
        Action::Lock {
            selection,
            include_dev,
        } => {
            let request = request(&selection, include_dev)?;
            let report = with_spinner(
                json,
                "locking environment...",
                "environment locked",
                "environment lock failed",
                || engine.lock_env(&request),
            )?;
            print_lock_report(report.as_ref(), json)?;
        }
        Action::Sync {
            selection,
            include_dev,
        } => {
            let request = request(&selection, include_dev)?;
            let report = engine.sync_env(&request).map_err(|e| e.to_string())?;
            if report.is_some() {
                print_lock_report(report.as_ref(), json)?;
            }
            if !json {
                println!("environment '{}' is in sync", engine.project().env.name);
            }
        }
        Action::Update {
            selection,
            include_dev,
        } => {
            let request = request(&selection, include_dev)?;
            let report = engine.update_env(&request).map_err(|e| e.to_string())?;
            print_lock_report(report.as_ref(), json)?;
        }
        Action::Run { args } => {
            let code = engine.run_in_env(&args).map_err(|e| e.to_string())?;
            return Ok(exit_code(code));
        }
    }
    Ok(EXIT_SUCCESS)
}

/// Exit codes outside `0..=255` become a plain failure.
fn exit_code(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(EXIT_FAILURE)
}
