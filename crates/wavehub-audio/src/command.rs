//! Control Thread <-> Audio Thread Commands (spec.md §4.7, §9)
//!
//! Replaces the source's ad-hoc pipe + struct-by-value messages with a
//! typed command channel and a matching reply channel, as spec.md §9 calls
//! for. Commands that require synchronous acknowledgement (stream add,
//! stream remove) carry a `response_id`; the control thread does not issue
//! the next synchronous command until the matching response arrives
//! (spec.md §5 ordering guarantee).

use std::os::unix::net::UnixStream;

use wavehub_core::{Rstream, StreamId};
use wavehub_proto::NodeAttr;

/// Sent from the control thread to the audio thread.
#[derive(Debug)]
pub enum AudioCommand {
    AddStream {
        dev_idx: u32,
        stream: Box<Rstream>,
        response_id: u64,
    },
    /// Hands over the accepted connection on a stream's audio side channel
    /// (spec.md §2 core subsystem #3, §6), once the client has connected to
    /// the path the control thread told it about. Unsolicited in the sense
    /// that it carries no `response_id`; the control thread doesn't block
    /// on this handoff.
    AttachAudioSocket {
        stream_id: StreamId,
        socket: UnixStream,
    },
    RemoveStream {
        stream_id: StreamId,
        response_id: u64,
    },
    SwitchStreamDevice {
        stream_id: StreamId,
        dev_idx: u32,
        response_id: u64,
    },
    SetSystemVolume {
        volume: f32,
    },
    SetSystemMute {
        mute: bool,
    },
    SetNodeAttr {
        dev_idx: u32,
        node_idx: u32,
        attr: NodeAttr,
        response_id: u64,
    },
    SelectNode {
        dev_idx: u32,
        node_idx: u32,
        response_id: u64,
    },
    Shutdown,
}

/// Sent from the audio thread back to the control thread.
#[derive(Debug)]
pub enum AudioResponse {
    Ack {
        response_id: u64,
        error: i32,
    },
    StreamAdded {
        response_id: u64,
        stream_id: StreamId,
        error: i32,
    },
    /// Unsolicited: a stream's socket faulted and it was disconnected.
    StreamDisconnected { stream_id: StreamId, error: i32 },
    /// Unsolicited: a stream was reattached to a different (e.g. fallback)
    /// device after its original device was suspended.
    StreamReattached { stream_id: StreamId, dev_idx: u32 },
    /// Unsolicited: a device was suspended after repeated fatal errors.
    DeviceSuspended { dev_idx: u32 },
}

pub type CommandSender = crossbeam_channel::Sender<AudioCommand>;
pub type CommandReceiver = crossbeam_channel::Receiver<AudioCommand>;
pub type ResponseSender = crossbeam_channel::Sender<AudioResponse>;
pub type ResponseReceiver = crossbeam_channel::Receiver<AudioResponse>;

/// Build the two channels wiring a control thread to an audio thread.
pub fn channel_pair() -> (CommandSender, CommandReceiver, ResponseSender, ResponseReceiver) {
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let (resp_tx, resp_rx) = crossbeam_channel::unbounded();
    (cmd_tx, cmd_rx, resp_tx, resp_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_flow_fifo_through_the_channel() {
        let (cmd_tx, cmd_rx, _resp_tx, _resp_rx) = channel_pair();
        cmd_tx.send(AudioCommand::SetSystemVolume { volume: 0.5 }).unwrap();
        cmd_tx.send(AudioCommand::SetSystemMute { mute: true }).unwrap();

        match cmd_rx.recv().unwrap() {
            AudioCommand::SetSystemVolume { volume } => assert_eq!(volume, 0.5),
            other => panic!("unexpected first command: {other:?}"),
        }
        match cmd_rx.recv().unwrap() {
            AudioCommand::SetSystemMute { mute } => assert!(mute),
            other => panic!("unexpected second command: {other:?}"),
        }
    }

    #[test]
    fn responses_are_delivered_to_the_control_thread() {
        let (_cmd_tx, _cmd_rx, resp_tx, resp_rx) = channel_pair();
        resp_tx
            .send(AudioResponse::Ack { response_id: 42, error: 0 })
            .unwrap();
        match resp_rx.recv().unwrap() {
            AudioResponse::Ack { response_id, error } => {
                assert_eq!(response_id, 42);
                assert_eq!(error, 0);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
