mod classifier;
mod settings;
mod web;

use std::env;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use classifier::Classifier;
use settings::{Args, Settings, API_KEY_ENV};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let settings = match Settings::load(args.config.as_deref()) {
        Ok(ret) => ret,
        Err(error) => {
            eprintln!("Problem while loading settings. {}", error);
            exit(1);
        }
    };

    let api_key = env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty());
    if api_key.is_none() {
        warn!("{API_KEY_ENV} is not set; classification requests will fail until it is");
    }

    let classifier = match Classifier::new(&settings.classifier, api_key) {
        Ok(ret) => ret,
        Err(error) => {
            eprintln!("Problem while building the upstream client. {}", error);
            exit(1);
        }
    };

    info!("listening on {}", settings.web.address);
    web::serve(Arc::new(classifier), settings.web.address).await;
}
