use std::{path::Path, rc::Rc};

use crate::{
    backend::{
        http_api::HttpChatApi,
        ws_transport::{WsSettings, WsTransport},
    },
    infra::{
        self, config::FileConfigAdapter, contracts::ConfigAdapter, error::AppError,
        kv_store::FileKeyValueStore, storage_layout::StorageLayout,
    },
    usecases::{
        client::{ClientCore, ClientSettings},
        context::AppContext,
    },
};

pub fn bootstrap(config_path: Option<&Path>) -> Result<AppContext, AppError> {
    let layout = StorageLayout::resolve()?;
    let context = build_context(config_path, layout)?;
    context.layout.ensure_dirs()?;

    let log_guard = infra::logging::init(&context.config.logging, &context.layout.log_dir)?;
    tracing::debug!(
        config_dir = %context.layout.config_dir.display(),
        "application context ready"
    );

    Ok(context.with_log_guard(log_guard))
}

fn build_context(
    config_path: Option<&Path>,
    layout: StorageLayout,
) -> Result<AppContext, AppError> {
    let config_adapter = FileConfigAdapter::new(config_path).with_user_path(layout.config_file());
    let config = config_adapter.load()?;

    Ok(AppContext::new(config, layout))
}

/// Wires the production adapters into a client core.
pub fn compose_client(context: &AppContext) -> Result<ClientCore, AppError> {
    let store = Rc::new(FileKeyValueStore::from_layout(&context.layout));
    let api = Rc::new(HttpChatApi::new(&context.config.backend)?);
    let transport = Rc::new(WsTransport::new(WsSettings::from_config(
        &context.config.backend,
        &context.config.realtime,
    )));

    Ok(ClientCore::new(
        store,
        api,
        transport,
        ClientSettings::from_config(&context.config),
    ))
}
