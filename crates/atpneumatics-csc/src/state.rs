//! Summary-state gate.
//!
//! Every pneumatics command passes through [`assert_enabled`] before it is
//! forwarded, and every lifecycle command through [`transition`].
//!
//! | From | Command | To |
//! |---|---|---|
//! | STANDBY | start | DISABLED |
//! | DISABLED | enable | ENABLED |
//! | ENABLED | disable | DISABLED |
//! | DISABLED | standby | STANDBY |
//! | FAULT | standby | STANDBY |
//! | STANDBY | exitControl | OFFLINE |

use atpneumatics_types::{LifecycleCommand, PneumaticsError, SummaryState};

/// Target state of `command` issued in state `from`.
///
/// # Errors
///
/// [`PneumaticsError::InvalidTransition`] for any pair not in the table
/// above.
pub fn transition(
    from: SummaryState,
    command: LifecycleCommand,
) -> Result<SummaryState, PneumaticsError> {
    use LifecycleCommand as C;
    use SummaryState as S;

    match (from, command) {
        (S::Standby, C::Start) => Ok(S::Disabled),
        (S::Disabled, C::Enable) => Ok(S::Enabled),
        (S::Enabled, C::Disable) => Ok(S::Disabled),
        (S::Disabled | S::Fault, C::Standby) => Ok(S::Standby),
        (S::Standby, C::ExitControl) => Ok(S::Offline),
        _ => Err(PneumaticsError::InvalidTransition {
            command: command.name().to_string(),
            from,
        }),
    }
}

/// Fail with [`PneumaticsError::NotEnabled`] unless `state` is ENABLED.
pub fn assert_enabled(state: SummaryState, command: &str) -> Result<(), PneumaticsError> {
    if state == SummaryState::Enabled {
        Ok(())
    } else {
        Err(PneumaticsError::NotEnabled {
            command: command.to_string(),
            state,
        })
    }
}
