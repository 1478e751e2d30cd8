use tokio::sync::watch;

/// Hint for the on-screen face shown next to the status text. The renderer
/// itself lives outside the daemon; consumers poll the channel on their own
/// cadence and only ever see the newest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceHint {
    Idle,
    Looking,
    Happy,
    Sad,
    Upload1,
    Upload2,
    Upload3,
}

impl FaceHint {
    pub fn glyph(self) -> &'static str {
        match self {
            FaceHint::Idle => "(-_-)",
            FaceHint::Looking => "(o_o)",
            FaceHint::Happy => "(^_^)",
            FaceHint::Sad => "(T_T)",
            FaceHint::Upload1 => "(1^_)",
            FaceHint::Upload2 => "(2^_)",
            FaceHint::Upload3 => "(3^_)",
        }
    }

    /// Cycles the upload faces so long runs visibly make progress.
    pub fn upload_frame(index: usize) -> Self {
        match index % 3 {
            0 => FaceHint::Upload1,
            1 => FaceHint::Upload2,
            _ => FaceHint::Upload3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub face: FaceHint,
    pub text: String,
}

/// Fire-and-forget progress reporting. Later updates overwrite earlier
/// unconsumed ones, so a slow consumer only renders the latest state.
#[derive(Clone)]
pub struct StatusSink {
    tx: watch::Sender<StatusUpdate>,
}

impl StatusSink {
    pub fn new() -> (Self, watch::Receiver<StatusUpdate>) {
        let (tx, rx) = watch::channel(StatusUpdate {
            face: FaceHint::Idle,
            text: String::new(),
        });
        (Self { tx }, rx)
    }

    pub fn notify(&self, face: FaceHint, text: impl Into<String>) {
        let _ = self.tx.send_replace(StatusUpdate {
            face,
            text: text.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_updates_overwrite_unconsumed_ones() {
        let (sink, rx) = StatusSink::new();
        sink.notify(FaceHint::Looking, "checking for new files");
        sink.notify(FaceHint::Happy, "backed up 2 files");

        let latest = rx.borrow().clone();
        assert_eq!(latest.face, FaceHint::Happy);
        assert_eq!(latest.text, "backed up 2 files");
    }

    #[test]
    fn notify_survives_a_dropped_consumer() {
        let (sink, rx) = StatusSink::new();
        drop(rx);
        sink.notify(FaceHint::Sad, "no network");
    }

    #[test]
    fn upload_frames_cycle() {
        assert_eq!(FaceHint::upload_frame(0), FaceHint::Upload1);
        assert_eq!(FaceHint::upload_frame(1), FaceHint::Upload2);
        assert_eq!(FaceHint::upload_frame(2), FaceHint::Upload3);
        assert_eq!(FaceHint::upload_frame(3), FaceHint::Upload1);
    }
}
