use std::io::Write;

use chrono::Utc;

/// Initialize env_logger with a microsecond timestamp format.
/// Safe to call more than once (later calls are no-ops), so every
/// integration test can just call it first thing.
pub fn init_log() {
    let env = env_logger::Env::default().default_filter_or("debug");
    let _ = env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
                record.level(),
                record.file().unwrap_or("<unnamed>"),
                record.line().unwrap_or(0),
                &record.args()
            )
        })
        .try_init();
}
