//! Server binary: initializes logging, then hands off to the library's
//! orchestration entry point.

fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    .format_timestamp_secs()
    .init();

  if let Err(err) = rembash_core::run_server() {
    log::error!("{err:#}");
    std::process::exit(1);
  }
}
