use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub listen: String,
    pub db_path: PathBuf,
    /// Identity peers put in `Epistula-Signed-For` when addressing this
    /// service. A present header that does not match is rejected before any
    /// signature work.
    pub identity: String,
    pub bucket_ttl: Duration,
    pub bucket_page_size: usize,
    pub max_body_bytes: usize,
    /// Local development only: skips Epistula verification entirely.
    pub insecure_skip_verify: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8091".to_string(),
            db_path: PathBuf::from("./data/epistula.db"),
            identity: String::new(),
            bucket_ttl: Duration::from_secs(1_200),
            bucket_page_size: 20,
            max_body_bytes: 1_048_576,
            insecure_skip_verify: false,
        }
    }
}
