use std::path::Path;

use crate::{
    infra::{self, config::FileConfigAdapter, contracts::ConfigAdapter, error::AppError},
    usecases::context::AppContext,
};

pub fn bootstrap(config_path: Option<&Path>) -> Result<AppContext, AppError> {
    let context = build_context(config_path)?;
    infra::logging::init(&context.config.logging)?;

    Ok(context)
}

fn build_context(config_path: Option<&Path>) -> Result<AppContext, AppError> {
    let config_adapter = FileConfigAdapter::new(config_path);
    let config = config_adapter.load()?;

    Ok(AppContext::new(config))
}
