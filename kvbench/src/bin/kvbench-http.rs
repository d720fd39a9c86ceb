//! Benchmarks a key-value store through its HTTP+JSON gateway.

use kvbench_client::HttpStore;

fn main() -> anyhow::Result<()> {
    kvbench::cli::execute::<HttpStore>()
}
