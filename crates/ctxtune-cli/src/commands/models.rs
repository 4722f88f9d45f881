//! Model discovery and listing

use crate::output;
use anyhow::{Context, Result};
use ctxtune_core::{
    model_names_match, Error, InferenceClient, ModelInfo, SearchConfig, TuneConfig,
};
use ctxtune_runtime::OllamaClient;

/// Resolve the configured model selection against the installed models.
///
/// `all_models` selects everything installed, sorted by name. Explicit names
/// keep their given order, duplicates dropped.
pub async fn select_models(
    client: &dyn InferenceClient,
    search: &SearchConfig,
) -> ctxtune_core::Result<Vec<ModelInfo>> {
    if !search.all_models && search.models.is_empty() {
        return Err(Error::config(
            "No models selected; pass --model NAME or --all-models",
        ));
    }

    let installed = client.list_models().await?;

    if search.all_models {
        let mut models = installed;
        models.sort_by(|a, b| a.name.cmp(&b.name));
        if models.is_empty() {
            return Err(Error::not_found("The inference server has no models installed"));
        }
        return Ok(models);
    }

    let mut selected: Vec<ModelInfo> = Vec::new();
    let mut missing = Vec::new();
    for name in &search.models {
        if selected.iter().any(|m| model_names_match(&m.name, name)) {
            continue;
        }
        match installed.iter().find(|m| model_names_match(&m.name, name)) {
            Some(model) => selected.push(model.clone()),
            None => missing.push(name.as_str()),
        }
    }

    if !missing.is_empty() {
        return Err(Error::not_found(format!(
            "Model(s) not installed: {}",
            missing.join(", ")
        )));
    }

    Ok(selected)
}

/// `ctxtune models`
pub async fn list(config: &TuneConfig, json: bool) -> Result<()> {
    let client = OllamaClient::from_config(&config.server, config.request_timeout())
        .context("Invalid server URL")?;

    let mut models = client
        .list_models()
        .await
        .with_context(|| format!("Failed to list models at {}", client.endpoint()))?;
    models.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
    } else if models.is_empty() {
        output::print_warning("No models installed");
    } else {
        println!("{}", output::models_table(&models));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxtune_core::mock::ScriptedClient;

    fn client() -> ScriptedClient {
        ScriptedClient::new()
            .with_model(ModelInfo::new("qwen2:7b").with_digest("sha256:aaaa"))
            .with_model(ModelInfo::new("llama3:8b").with_digest("sha256:bbbb"))
            .with_model(ModelInfo::new("gemma2:latest"))
    }

    fn search(models: &[&str], all_models: bool) -> SearchConfig {
        SearchConfig {
            models: models.iter().map(|m| m.to_string()).collect(),
            all_models,
            ..SearchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_all_models_sorted() {
        let models = select_models(&client(), &search(&[], true)).await.unwrap();
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["gemma2:latest", "llama3:8b", "qwen2:7b"]);
    }

    #[tokio::test]
    async fn test_explicit_selection_keeps_order_and_digest() {
        let models = select_models(&client(), &search(&["qwen2:7b", "gemma2", "qwen2:7b"], false))
            .await
            .unwrap();

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "qwen2:7b");
        assert_eq!(models[0].digest.as_deref(), Some("sha256:aaaa"));
        assert_eq!(models[1].name, "gemma2:latest");
    }

    #[tokio::test]
    async fn test_missing_model_is_reported() {
        let err = select_models(&client(), &search(&["llama3:8b", "mistral"], false))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("mistral"));
    }

    #[tokio::test]
    async fn test_nothing_selected() {
        let err = select_models(&client(), &search(&[], false)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client = client();
        client.set_reachable(false);
        assert!(select_models(&client, &search(&[], true)).await.is_err());
    }
}
