use std::path::PathBuf;

use clap::Parser;

/// Startup options. Every flag can also come from the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "leaf_diagnosis")]
#[command(about = "Serves a plant leaf disease classifier over HTTP", long_about = None)]
pub struct Cli {
    /// Listen address
    #[arg(long, env = "LEAF_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Listen port
    #[arg(short, long, env = "LEAF_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Enable debug logging
    #[arg(short, long, env = "LEAF_DEBUG")]
    pub debug: bool,

    /// Path to the model weights (safetensors)
    #[arg(short, long, env = "LEAF_MODEL", default_value = "model/model.safetensors")]
    pub model: PathBuf,

    /// Fetch the weights from this Hugging Face repo instead of a local path
    #[arg(long, env = "LEAF_HF_REPO")]
    pub hf_repo: Option<String>,

    /// Revision of `--hf-repo` to fetch
    #[arg(long, env = "LEAF_HF_REVISION", default_value = "main")]
    pub hf_revision: String,

    /// Largest accepted upload, in megabytes
    #[arg(long, env = "LEAF_MAX_UPLOAD_MB", default_value_t = 32)]
    pub max_upload_mb: usize,

    /// Answer input errors with 400 and inference errors with 500 instead of 200
    #[arg(long, env = "LEAF_STRICT_STATUS")]
    pub strict_status: bool,
}

impl Cli {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Resolves the weights file, downloading it from the Hub when a repo is set.
    pub fn model_file(&self) -> anyhow::Result<PathBuf> {
        let Some(repo) = &self.hf_repo else {
            return Ok(self.model.clone());
        };
        let file_name = self
            .model
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("model.safetensors");
        let api = hf_hub::api::sync::Api::new()?;
        let api = api.repo(hf_hub::Repo::with_revision(
            repo.clone(),
            hf_hub::RepoType::Model,
            self.hf_revision.clone(),
        ));
        Ok(api.get(file_name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["leaf_diagnosis"]).unwrap();
        assert_eq!(cli.bind_addr(), "127.0.0.1:5000");
        assert!(!cli.debug);
        assert!(!cli.strict_status);
        assert_eq!(cli.model, PathBuf::from("model/model.safetensors"));
        assert_eq!(cli.max_upload_bytes(), 32 * 1024 * 1024);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "leaf_diagnosis",
            "--host",
            "0.0.0.0",
            "-p",
            "8080",
            "--debug",
            "--model",
            "/srv/leaf.safetensors",
            "--strict-status",
        ])
        .unwrap();
        assert_eq!(cli.bind_addr(), "0.0.0.0:8080");
        assert!(cli.debug);
        assert!(cli.strict_status);
        assert_eq!(cli.model_file().unwrap(), PathBuf::from("/srv/leaf.safetensors"));
    }
}
