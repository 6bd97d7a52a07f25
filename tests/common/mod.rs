/// Path to a tiny script used as the worker "runtime" in tests that need a
/// worker parked in `Booting`: it ignores every argument `Worker::start`
/// passes it and blocks indefinitely, so tests can call `mark_ready`
/// without racing a real subprocess's exit.
pub const BLOCKING_RUNTIME: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/block_forever.sh");
