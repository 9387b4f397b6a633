pub mod message_logger;
pub mod quick_start;

/// Loads `.env` from the demos crate dir, then from the current dir.
pub fn load_env() {
    if let Ok(canon) = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join(".env")
        .canonicalize()
    {
        let _ = dotenvy::from_path(canon);
    }
    let _ = dotenvy::dotenv();
}
