mod batch_exec;
mod bundle;
mod cli;
mod grpc;
mod manager;
mod postprocess;
mod request;
#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sightd_backend_ort::{OrtDevice, OrtEngine, py};
use sightd_proto::FILE_DESCRIPTOR_SET;
use sightd_proto::sightd::v1::detect_service_server::DetectServiceServer;
use sightd_runtime::{BatchPolicy, BatchScheduler, InferenceSession};

use crate::batch_exec::BatchExecutor;
use crate::bundle::load_latest_bundle;
use crate::cli::{Cli, Command};
use crate::grpc::DetectSvc;
use crate::manager::{ModelManager, ServableModel};
use crate::request::DetectTask;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            grpc_addr,
            log,
            device,
            model_name,
            model_base_path,
            max_batch_size,
            max_enqueued_batches,
            batch_timeout_ms,
            backend_batch_limit,
            python_path,
        } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log)),
                )
                .init();

            serve(ServeConfig {
                grpc_addr,
                device: parse_device(&device)?,
                model_name,
                model_base_path,
                policy: BatchPolicy {
                    max_batch_size,
                    max_enqueued_batches,
                    batch_timeout: Duration::from_millis(batch_timeout_ms),
                },
                backend_batch_limit,
                python_path,
            })
            .await
        }
    }
}

struct ServeConfig {
    grpc_addr: String,
    device: OrtDevice,
    model_name: String,
    model_base_path: String,
    policy: BatchPolicy,
    backend_batch_limit: usize,
    python_path: Vec<String>,
}

fn parse_device(device: &str) -> Result<OrtDevice> {
    if device == "cpu" {
        return Ok(OrtDevice::Cpu);
    }
    if let Some(id) = device.strip_prefix("cuda:") {
        let device_id = id
            .parse()
            .with_context(|| format!("invalid CUDA device id '{id}'"))?;
        return Ok(OrtDevice::Cuda { device_id });
    }
    bail!("unknown device '{device}', expected 'cpu' or 'cuda:N'")
}

async fn serve(config: ServeConfig) -> Result<()> {
    if !config.python_path.is_empty() {
        py::ensure_initialized()?;
        for path in &config.python_path {
            py::extend_module_path(path)?;
        }
    }

    let bundle = load_latest_bundle(Path::new(&config.model_base_path))?;
    let model_path = bundle.model_path.clone();
    let device = config.device;
    let session = InferenceSession::load(&config.model_name, move || {
        OrtEngine::load(&model_path, device)
    })?;

    let manager = Arc::new(ModelManager::new());
    manager.insert(ServableModel::new(
        config.model_name.clone(),
        bundle.version,
        Box::new(session),
        bundle.labels,
    ));

    let (scheduler, batch_rx) = BatchScheduler::<DetectTask>::new(config.policy);
    let executor = BatchExecutor::new(
        Arc::clone(&manager),
        config.model_name.clone(),
        config.backend_batch_limit,
    );
    tokio::spawn(executor.run(batch_rx));

    let svc = DetectSvc::new(scheduler, manager, config.model_name);
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let addr = config
        .grpc_addr
        .parse()
        .with_context(|| format!("invalid gRPC bind address '{}'", config.grpc_addr))?;
    info!(%addr, "serving gRPC");
    Server::builder()
        .add_service(DetectServiceServer::new(svc))
        .add_service(reflection)
        .serve(addr)
        .await?;

    Ok(())
}
