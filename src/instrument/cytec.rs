//! Cytec relay matrix driver
//!
//! The matrix takes `;`-separated commands terminated by `\r\n`:
//!
//! - `C` clears every latched relay
//! - `L <module> <channel>` latches one relay
//! - `U <module> <channel>` releases one relay
//!
//! The controller reads at most 19 characters per line, so commands are packed
//! into frames that stay under that limit. A blank frame always goes first;
//! without it the controller drops the first real command.
//!
//! Latching or releasing a relay on a module also requires the module's
//! routing relay, which is appended automatically (see [`companion_command`]).
//!
//! ## Configuration
//!
//! ```toml
//! [mux]
//! kind = "cytec"
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! settle_ms = 200
//! ```
use crate::{
    adapters::Adapter,
    core::{ChannelSelection, Multiplexer},
    error::{AppResult, DaqError},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Frames whose content reaches this length are split.
const MAX_FRAME_CHARS: usize = 19;

const FRAME_TERMINATOR: &str = "\r\n";

/// A relay address on the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relay {
    /// Matrix module
    pub module: u8,
    /// Relay within the module
    pub channel: u8,
}

impl Relay {
    /// Parse a `"module,channel"` cell.
    pub fn parse(cell: &str) -> AppResult<Self> {
        let malformed =
            || DaqError::ChannelSwitch(format!("channel '{}' is not 'module,channel'", cell));
        let (module, channel) = cell.split_once(',').ok_or_else(malformed)?;
        Ok(Self {
            module: module.trim().parse().map_err(|_| malformed())?,
            channel: channel.trim().parse().map_err(|_| malformed())?,
        })
    }
}

/// The routing latch a `U`/`L` command on `module` needs, if any.
///
/// Modules 2 and 7 are the routing modules themselves and cannot carry a
/// transducer.
pub fn companion_command(command: &str) -> AppResult<Option<String>> {
    let mut bits = command.split_whitespace();
    match bits.next() {
        Some("U") | Some("L") => {}
        _ => return Ok(None),
    }
    let module: i64 = bits
        .next()
        .and_then(|m| m.parse().ok())
        .ok_or_else(|| DaqError::ChannelSwitch(format!("command '{}' has no module", command)))?;
    let routing = match module {
        0 => "L 2 0",
        1 => "L 2 1",
        3 => "L 2 2",
        4 => "L 2 3",
        5 => "L 7 0",
        6 => "L 7 1",
        8 => "L 7 2",
        9 => "L 7 3",
        other => {
            return Err(DaqError::ChannelSwitch(format!(
                "module {} is not a usable module",
                other
            )))
        }
    };
    Ok(Some(routing.to_string()))
}

/// Pack commands into terminated frames, a blank frame first.
pub fn pack_frames<S: AsRef<str>>(commands: &[S]) -> Vec<String> {
    let mut frames = vec![String::new(), String::new()];
    for command in commands {
        let command = command.as_ref();
        let last_len = frames.last().map_or(0, String::len);
        if last_len + command.len() + 1 >= MAX_FRAME_CHARS {
            frames.push(format!("{};", command));
        } else if let Some(last) = frames.last_mut() {
            last.push_str(command);
            last.push(';');
        }
    }
    frames
        .into_iter()
        .map(|frame| frame + FRAME_TERMINATOR)
        .collect()
}

/// Cytec matrix on any frame adapter (serial in production, mock in tests).
pub struct CytecMux<A: Adapter> {
    adapter: A,
    settle: Duration,
    connected: bool,
    active: Option<ChannelSelection>,
}

impl<A: Adapter> CytecMux<A> {
    /// Matrix on `adapter`, waiting `settle` after each frame.
    pub fn new(adapter: A, settle: Duration) -> Self {
        Self {
            adapter,
            settle,
            connected: false,
            active: None,
        }
    }

    /// The selection currently latched, if any.
    pub fn active(&self) -> Option<&ChannelSelection> {
        self.active.as_ref()
    }

    async fn ensure_connected(&mut self) -> AppResult<()> {
        if !self.connected {
            self.adapter
                .connect()
                .await
                .map_err(|e| DaqError::ChannelSwitch(format!("{:#}", e)))?;
            self.connected = true;
            info!("Cytec multiplexer connected");
        }
        Ok(())
    }

    /// Send `commands` plus their routing latches. Returns the controller's
    /// reply to each non-blank frame.
    pub async fn send_commands(&mut self, commands: &[String]) -> AppResult<Vec<String>> {
        self.ensure_connected().await?;

        let mut all = commands.to_vec();
        for command in commands {
            if let Some(routing) = companion_command(command)? {
                all.push(routing);
            }
        }

        let mut replies = Vec::new();
        for frame in pack_frames(&all) {
            self.adapter
                .write_frame(&frame)
                .await
                .map_err(|e| DaqError::ChannelSwitch(format!("write failed: {:#}", e)))?;
            tokio::time::sleep(self.settle).await;
            let reply = self
                .adapter
                .read_available()
                .await
                .map_err(|e| DaqError::ChannelSwitch(format!("read failed: {:#}", e)))?;
            if frame != FRAME_TERMINATOR {
                debug!("Cytec {:?} -> {:?}", frame.trim_end(), reply);
                replies.push(reply);
            }
        }
        Ok(replies)
    }

    /// Latch `relays`, clearing the matrix first when `clear_first` is set.
    pub async fn latch(&mut self, relays: &[Relay], clear_first: bool) -> AppResult<Vec<String>> {
        let mut commands = Vec::with_capacity(relays.len() + 1);
        if clear_first {
            commands.push("C".to_string());
        }
        commands.extend(
            relays
                .iter()
                .map(|r| format!("L {} {}", r.module, r.channel)),
        );
        self.send_commands(&commands).await
    }

    /// Open `relays`.
    pub async fn unlatch(&mut self, relays: &[Relay]) -> AppResult<Vec<String>> {
        let commands: Vec<String> = relays
            .iter()
            .map(|r| format!("U {} {}", r.module, r.channel))
            .collect();
        self.send_commands(&commands).await
    }

    /// Open every relay.
    pub async fn clear_all(&mut self) -> AppResult<Vec<String>> {
        let replies = self.send_commands(&["C".to_string()]).await?;
        self.active = None;
        Ok(replies)
    }
}

#[async_trait]
impl<A: Adapter> Multiplexer for CytecMux<A> {
    fn name(&self) -> String {
        "Cytec Matrix".to_string()
    }

    async fn switch_channel(&mut self, selection: &ChannelSelection) -> AppResult<()> {
        let relays = selection
            .channels()
            .map(Relay::parse)
            .collect::<AppResult<Vec<_>>>()?;
        self.latch(&relays, true).await?;
        self.active = Some(selection.clone());
        Ok(())
    }
}
