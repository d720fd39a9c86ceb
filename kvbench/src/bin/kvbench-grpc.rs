//! Benchmarks a key-value store through its gRPC API.

use kvbench_client::GrpcStore;

fn main() -> anyhow::Result<()> {
    kvbench::cli::execute::<GrpcStore>()
}
