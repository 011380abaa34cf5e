pub mod ii;
pub mod wc;

use crate::mr::MRApp;

pub fn get_app(app: &str) -> Result<Box<dyn MRApp>, anyhow::Error> {
    match app {
        "wc" => Ok(Box::new(wc::WC)),
        "ii" => Ok(Box::new(ii::InvertedIndex)),
        _ => Err(anyhow::anyhow!("Unknown app: {}", app)),
    }
}
