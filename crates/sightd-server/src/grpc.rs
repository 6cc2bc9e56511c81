use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use sightd_proto::sightd::v1 as pb;
use sightd_proto::sightd::v1::detect_service_server::DetectService;
use sightd_runtime::{BatchScheduler, ScheduleError};

use crate::manager::ModelManager;
use crate::request::{DetectTask, IMAGE_DATA_SIZE, IMAGE_HEIGHT, IMAGE_WIDTH};

/// Status messages forwarded to clients are capped so a backend error
/// chain cannot balloon a response trailer.
const MAX_STATUS_MESSAGE_LEN: usize = 512;

pub fn cap_status(status: Status) -> Status {
    if status.message().len() <= MAX_STATUS_MESSAGE_LEN {
        return status;
    }
    let capped: String = status.message().chars().take(MAX_STATUS_MESSAGE_LEN).collect();
    Status::new(status.code(), capped)
}

pub struct DetectSvc {
    scheduler: Arc<BatchScheduler<DetectTask>>,
    manager: Arc<ModelManager>,
    model_name: String,
}

impl DetectSvc {
    pub fn new(
        scheduler: Arc<BatchScheduler<DetectTask>>,
        manager: Arc<ModelManager>,
        model_name: String,
    ) -> Self {
        Self {
            scheduler,
            manager,
            model_name,
        }
    }

    fn validate(&self, req: &pb::DetectRequest) -> Result<(), Status> {
        if !self.manager.has_ready(&self.model_name) {
            return Err(Status::unavailable(format!(
                "model '{}' is not ready to serve",
                self.model_name
            )));
        }
        if req.image_data.len() != IMAGE_DATA_SIZE {
            return Err(Status::invalid_argument(format!(
                "expected image_data of size {IMAGE_DATA_SIZE}, got {}",
                req.image_data.len()
            )));
        }
        if req.width != IMAGE_WIDTH as u32 || req.height != IMAGE_HEIGHT as u32 {
            return Err(Status::invalid_argument(format!(
                "expected a {IMAGE_WIDTH}x{IMAGE_HEIGHT} image, got {}x{}",
                req.width, req.height
            )));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl DetectService for DetectSvc {
    async fn detect(
        &self,
        request: Request<pb::DetectRequest>,
    ) -> Result<Response<pb::DetectResponse>, Status> {
        let req = request.into_inner();
        self.validate(&req).map_err(cap_status)?;

        let (task, resp_rx) = DetectTask::new(req.image_data.into());
        if let Err(err) = self.scheduler.schedule(task) {
            // The task came back unexecuted; fail only this request.
            warn!(%err, "rejected detect request at admission");
            let status = match &err {
                ScheduleError::QueueFull { .. } => Status::unavailable(err.to_string()),
                ScheduleError::Shutdown(_) => Status::unavailable(err.to_string()),
            };
            return Err(cap_status(status));
        }

        let detections = resp_rx
            .await
            .map_err(|_| Status::internal("the detection pipeline dropped the request"))?
            .map_err(cap_status)?;

        debug!(detections = detections.len(), "completed detect request");
        Ok(Response::new(pb::DetectResponse { detections }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch_exec::BatchExecutor;
    use crate::manager::ServableModel;
    use crate::testing::{self, MockEngine};
    use sightd_runtime::{BatchPolicy, InferenceSession};
    use std::time::Duration;

    fn pipeline(max_batch_size: usize) -> DetectSvc {
        let manager = Arc::new(ModelManager::new());
        let session = InferenceSession::load("mock", || Ok(MockEngine::new())).unwrap();
        manager.insert(ServableModel::new(
            "detector",
            1,
            Box::new(session),
            testing::labels(),
        ));

        let (scheduler, rx) = BatchScheduler::new(BatchPolicy {
            max_batch_size,
            max_enqueued_batches: 250,
            batch_timeout: Duration::from_millis(5),
        });
        let executor = BatchExecutor::new(Arc::clone(&manager), "detector".into(), max_batch_size);
        tokio::spawn(executor.run(rx));

        DetectSvc::new(scheduler, manager, "detector".into())
    }

    fn well_formed_request() -> pb::DetectRequest {
        pb::DetectRequest {
            image_data: vec![0u8; IMAGE_DATA_SIZE],
            width: IMAGE_WIDTH as u32,
            height: IMAGE_HEIGHT as u32,
        }
    }

    #[tokio::test]
    async fn wrong_payload_size_is_invalid_argument() {
        let svc = pipeline(1);
        let req = pb::DetectRequest {
            image_data: vec![0u8; 16],
            width: IMAGE_WIDTH as u32,
            height: IMAGE_HEIGHT as u32,
        };
        let status = svc.detect(Request::new(req)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("expected image_data of size 1440000"));
    }

    #[tokio::test]
    async fn wrong_dimensions_are_invalid_argument() {
        let svc = pipeline(1);
        let mut req = well_formed_request();
        req.width = 640;
        req.height = 480;
        let status = svc.detect(Request::new(req)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("800x600"));
    }

    #[tokio::test]
    async fn unknown_model_is_unavailable() {
        let manager = Arc::new(ModelManager::new());
        let (scheduler, _rx) = BatchScheduler::new(BatchPolicy {
            max_batch_size: 1,
            max_enqueued_batches: 1,
            batch_timeout: Duration::from_millis(5),
        });
        let svc = DetectSvc::new(scheduler, manager, "detector".into());

        let status = svc
            .detect(Request::new(well_formed_request()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn well_formed_request_returns_foreground_detections() {
        let svc = pipeline(1);
        let resp = svc
            .detect(Request::new(well_formed_request()))
            .await
            .unwrap()
            .into_inner();

        // The mock network reports one background and one widget roi;
        // only the widget survives emission.
        assert_eq!(resp.detections.len(), 1);
        let det = &resp.detections[0];
        assert_eq!(det.class_label, "widget");
        assert!((det.score - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_pipeline() {
        let svc = Arc::new(pipeline(1));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                svc.detect(Request::new(well_formed_request())).await
            }));
        }
        for handle in handles {
            let resp = handle.await.unwrap().unwrap().into_inner();
            assert_eq!(resp.detections.len(), 1);
        }
    }

    #[test]
    fn long_status_messages_are_capped() {
        let status = Status::internal("x".repeat(4096));
        let capped = cap_status(status);
        assert_eq!(capped.code(), tonic::Code::Internal);
        assert_eq!(capped.message().len(), MAX_STATUS_MESSAGE_LEN);
    }
}
