use bytes::Bytes;
use sightd_proto::sightd::v1 as pb;
use tokio::sync::oneshot;
use tonic::Status;

pub const IMAGE_WIDTH: usize = 800;
pub const IMAGE_HEIGHT: usize = 600;
pub const NUM_CHANNELS: usize = 3;
/// Every request must carry exactly this many raw pixel bytes.
pub const IMAGE_DATA_SIZE: usize = IMAGE_WIDTH * IMAGE_HEIGHT * NUM_CHANNELS;

pub type DetectResult = Result<Vec<pb::Detection>, Status>;

/// One admitted request: the decoded payload plus the completion slot
/// wired back to the transport task that owns the RPC.
///
/// The scheduler owns the task from admission until the batch executor
/// completes it. Completing consumes the task, so a request can never
/// be finished twice.
#[derive(Debug)]
pub struct DetectTask {
    pub image_data: Bytes,
    resp_tx: oneshot::Sender<DetectResult>,
}

impl DetectTask {
    pub fn new(image_data: Bytes) -> (Self, oneshot::Receiver<DetectResult>) {
        let (resp_tx, resp_rx) = oneshot::channel();
        (
            Self {
                image_data,
                resp_tx,
            },
            resp_rx,
        )
    }

    pub fn complete(self, result: DetectResult) {
        // The receiver is gone only if the client hung up first.
        let _ = self.resp_tx.send(result);
    }
}
