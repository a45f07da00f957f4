use crate::index::Language;
use crate::indexer::Adapter;

pub fn list_languages() {
    println!("Supported languages:");
    for language in Language::ALL {
        let extensions: Vec<String> = language
            .extensions()
            .iter()
            .map(|ext| format!(".{}", ext))
            .collect();
        let status = match Adapter::for_language(language).check_available() {
            Ok(()) => "available".to_string(),
            Err(e) => format!("unavailable ({})", e.reason),
        };
        println!("  {:<12} {:<24} {}", language.as_str(), extensions.join(" "), status);
    }
}
