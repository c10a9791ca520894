fn main() {
    if let Err(err) = ev_metering::app::run_api() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
