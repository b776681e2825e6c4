//! Instrument drivers and the factories that pick one from configuration.
//!
//! | `pulser.kind` | driver                   |
//! |---------------|--------------------------|
//! | `mock`        | [`mock::MockPulser`]     |
//! | `remote`      | [`remote::RemotePulser`] |
//!
//! | `mux.kind` | driver                                       |
//! |------------|----------------------------------------------|
//! | `none`     | no multiplexer                               |
//! | `mock`     | [`mock::MockMux`]                            |
//! | `cytec`    | [`cytec::CytecMux`] over a serial adapter    |

pub mod cytec;
pub mod mock;
pub mod remote;

use crate::{
    adapters::SerialAdapter,
    config::{MuxKind, PulserKind, Settings},
    core::{Multiplexer, Pulser},
    error::{AppResult, DaqError},
};
use std::time::Duration;

/// Build the configured pulser. Does not connect.
pub fn build_pulser(settings: &Settings) -> AppResult<Box<dyn Pulser>> {
    let cfg = &settings.pulser;
    match cfg.kind {
        PulserKind::Mock => Ok(Box::new(mock::MockPulser::new())),
        PulserKind::Remote => {
            let address = cfg.address.clone().ok_or_else(|| {
                DaqError::Configuration("Remote pulser requires 'pulser.address'".to_string())
            })?;
            Ok(Box::new(remote::RemotePulser::new(
                address,
                Duration::from_millis(cfg.timeout_ms),
            )))
        }
    }
}

/// Build the configured multiplexer, or `None` when the rig has none.
pub fn build_multiplexer(settings: &Settings) -> AppResult<Option<Box<dyn Multiplexer>>> {
    let cfg = &settings.mux;
    match cfg.kind {
        MuxKind::None => Ok(None),
        MuxKind::Mock => Ok(Some(Box::new(mock::MockMux::new(cfg.channels)))),
        MuxKind::Cytec => {
            let port = cfg.port.clone().ok_or_else(|| {
                DaqError::Configuration("Cytec multiplexer requires 'mux.port'".to_string())
            })?;
            let adapter = SerialAdapter::new(port, cfg.baud_rate);
            Ok(Some(Box::new(cytec::CytecMux::new(
                adapter,
                Duration::from_millis(cfg.settle_ms),
            ))))
        }
    }
}
