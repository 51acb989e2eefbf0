use std::env;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Runtime configuration from the process environment. Required variables
/// missing at startup surface as configuration errors naming the variable;
/// optional ones degrade their feature at the affected endpoint.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub app_url: String,
    pub jwt_secret: String,
    pub encryption_key: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub mapbox_access_token: Option<String>,
}

fn required(name: &'static str) -> Result<String> {
    env::var(name).map_err(|_| Error::Configuration(name.to_owned()))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let environment = match env::var("ENVIRONMENT").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };
        Ok(Self {
            environment,
            app_url: required("APP_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            encryption_key: required("ENCRYPTION_KEY")?,
            stripe_secret_key: optional("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: optional("STRIPE_WEBHOOK_SECRET"),
            mapbox_access_token: optional("MAPBOX_ACCESS_TOKEN"),
        })
    }
}
