use log::LevelFilter;

/// Info level logs for the relayer, nothing from other crates. Safe to call more than once.
pub fn setup_logging() {
    let _ = env_logger::builder()
        .filter_module("hyperspace-link", LevelFilter::Info)
        .filter_module("hyperspace_link", LevelFilter::Info)
        .format_module_path(false)
        .is_test(cfg!(test))
        .try_init();
}
