use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sightd", version, about = "Batched object-detection inference daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the detection server
    Serve {
        /// Bind address for gRPC
        #[arg(long, default_value = "0.0.0.0:9000")]
        grpc_addr: String,

        /// Log level (RUST_LOG)
        #[arg(long, default_value = "info")]
        log: String,

        /// Device for inference (cpu or cuda:N)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Name the model is served under
        #[arg(long, default_value = "detector")]
        model_name: String,

        /// Base path containing numbered model version directories
        #[arg(long, default_value = "models/detector")]
        model_base_path: String,

        /// Maximum number of tasks assembled into one batch
        #[arg(long, default_value_t = 1)]
        max_batch_size: usize,

        /// Closed-but-unexecuted batches tolerated before admission is
        /// rejected. Large by default to avoid rejecting requests; a
        /// deployment behind a load balancer may want a much smaller
        /// value.
        #[arg(long, default_value_t = 250)]
        max_enqueued_batches: usize,

        /// How long a partially filled batch may wait before closing (ms)
        #[arg(long, default_value_t = 10)]
        batch_timeout_ms: u64,

        /// Largest batch the backend accepts in one forward pass
        #[arg(long, default_value_t = 1)]
        backend_batch_limit: usize,

        /// Extra module search paths for models with Python custom
        /// layers (requires a build with the `python` feature)
        #[arg(long)]
        python_path: Vec<String>,
    },
}
