//! Single-repository analysis, for debugging the pipeline.

use crate::config::Config;
use crate::envelope::Envelope;
use crate::model::RepoDescriptor;

use super::build_pipeline;

pub(super) fn cmd_analyze(
    config: &Config,
    full_name: &str,
    language: &str,
    old: bool,
    remote_url: Option<String>,
) -> Result<(), String> {
    if full_name.split('/').filter(|part| !part.is_empty()).count() != 2 {
        return Err(format!("expected owner/name, got {full_name:?}"));
    }

    let mut descriptor = RepoDescriptor::from_github_name(full_name, language, old);
    if let Some(url) = remote_url {
        descriptor.remote_url = url;
    }

    let pipeline = build_pipeline(config, &config.work_dir().join("analyze"));
    let result = pipeline.execute(&descriptor);

    let envelope = Envelope::encode(&result).map_err(|e| format!("failed to encode result: {e}"))?;
    let json = serde_json::to_string_pretty(&envelope)
        .map_err(|e| format!("failed to encode result: {e}"))?;
    println!("{json}");
    Ok(())
}
