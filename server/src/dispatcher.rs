use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("no connected presences to receive op code {0}")]
    NoReceivers(i64),
}

/// Outbound message from a match to its sockets.
#[derive(Debug, Clone)]
pub struct MatchBroadcast {
    pub op_code: i64,
    pub data: Vec<u8>,
    /// Only these session ids receive it, `None` means everyone
    pub targets: Option<Vec<String>>,
    /// These session ids never receive it
    pub exclude: Option<Vec<String>>,
    pub reliable: bool,
}

impl MatchBroadcast {
    /// Whether the socket with `session_id` should receive this message.
    pub fn is_for(&self, session_id: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.iter().any(|id| id == session_id) {
                return false;
            }
        }
        match &self.targets {
            Some(targets) => targets.iter().any(|id| id == session_id),
            None => true,
        }
    }
}

/// Broadcast channel handed to the coordinator.
pub trait Dispatcher: Send + Sync {
    fn broadcast_message(
        &self,
        op_code: i64,
        data: Vec<u8>,
        targets: Option<&[String]>,
        exclude: Option<&[String]>,
        reliable: bool,
    ) -> Result<(), BroadcastError>;
}

/// Dispatcher backed by the match's tokio broadcast channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: broadcast::Sender<MatchBroadcast>,
}

impl ChannelDispatcher {
    pub fn new(tx: broadcast::Sender<MatchBroadcast>) -> Self {
        Self { tx }
    }
}

impl Dispatcher for ChannelDispatcher {
    fn broadcast_message(
        &self,
        op_code: i64,
        data: Vec<u8>,
        targets: Option<&[String]>,
        exclude: Option<&[String]>,
        reliable: bool,
    ) -> Result<(), BroadcastError> {
        self.tx
            .send(MatchBroadcast {
                op_code,
                data,
                targets: targets.map(<[String]>::to_vec),
                exclude: exclude.map(<[String]>::to_vec),
                reliable,
            })
            .map(|_| ())
            .map_err(|_| BroadcastError::NoReceivers(op_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(targets: Option<Vec<&str>>, exclude: Option<Vec<&str>>) -> MatchBroadcast {
        let owned = |ids: Vec<&str>| -> Vec<String> { ids.into_iter().map(String::from).collect() };
        MatchBroadcast {
            op_code: 1,
            data: vec![],
            targets: targets.map(owned),
            exclude: exclude.map(owned),
            reliable: true,
        }
    }

    #[test]
    fn untargeted_message_reaches_everyone() {
        assert!(msg(None, None).is_for("a"));
    }

    #[test]
    fn targets_restrict_recipients() {
        let m = msg(Some(vec!["a"]), None);
        assert!(m.is_for("a"));
        assert!(!m.is_for("b"));
    }

    #[test]
    fn exclusion_wins_over_targets() {
        let m = msg(Some(vec!["a", "b"]), Some(vec!["a"]));
        assert!(!m.is_for("a"));
        assert!(m.is_for("b"));
    }

    #[test]
    fn broadcast_without_subscribers_fails() {
        let (tx, _) = broadcast::channel(4);
        let dispatcher = ChannelDispatcher::new(tx);
        assert!(matches!(
            dispatcher.broadcast_message(999, vec![], None, None, true),
            Err(BroadcastError::NoReceivers(999))
        ));
    }

    #[test]
    fn broadcast_reaches_subscriber() {
        let (tx, mut rx) = broadcast::channel(4);
        let dispatcher = ChannelDispatcher::new(tx);
        dispatcher
            .broadcast_message(7, b"hi".to_vec(), None, None, false)
            .unwrap();
        let got = rx.try_recv().unwrap();
        assert_eq!(got.op_code, 7);
        assert_eq!(got.data, b"hi");
        assert!(!got.reliable);
    }
}
