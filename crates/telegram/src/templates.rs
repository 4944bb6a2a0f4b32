//! Localized message copy. Each locale ships as a flat TOML table of tera
//! templates compiled into the binary; a key missing from one locale falls back
//! to English.

use std::collections::{BTreeMap, HashSet};

use tera::{Context, Tera};
use thiserror::Error;

use romupunkt_core::conversation::Prompt;
use romupunkt_core::domain::Locale;

const BUNDLES: [(Locale, &str); 3] = [
    (Locale::En, include_str!("../locales/en.toml")),
    (Locale::Ee, include_str!("../locales/ee.toml")),
    (Locale::Ru, include_str!("../locales/ru.toml")),
];

const FALLBACK: Locale = Locale::En;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("locale bundle `{locale}` is not valid TOML: {source}")]
    Bundle {
        locale: &'static str,
        #[source]
        source: toml::de::Error,
    },
    #[error("template `{0}` is not defined for any locale")]
    Missing(String),
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),
}

impl From<TemplateError> for romupunkt_core::errors::ApplicationError {
    fn from(error: TemplateError) -> Self {
        Self::Delivery(error.to_string())
    }
}

pub struct Templates {
    tera: Tera,
    names: HashSet<String>,
}

impl Templates {
    pub fn new() -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        let mut names = HashSet::new();
        let mut raw = Vec::new();

        for (locale, source) in BUNDLES {
            let table: BTreeMap<String, String> = toml::from_str(source)
                .map_err(|source| TemplateError::Bundle { locale: locale.as_str(), source })?;
            for (key, body) in table {
                let name = template_name(locale, &key);
                names.insert(name.clone());
                raw.push((name, body));
            }
        }
        tera.add_raw_templates(raw)?;

        Ok(Self { tera, names })
    }

    pub fn render(&self, locale: Locale, key: &str, context: &Context) -> Result<String, TemplateError> {
        let name = self.resolve(locale, key)?;
        Ok(self.tera.render(&name, context)?)
    }

    /// Renders a template that takes no variables.
    pub fn text(&self, locale: Locale, key: &str) -> Result<String, TemplateError> {
        self.render(locale, key, &Context::new())
    }

    pub fn prompt(&self, locale: Locale, prompt: &Prompt) -> Result<String, TemplateError> {
        let (key, context) = prompt_template(prompt);
        self.render(locale, key, &context)
    }

    pub fn has(&self, locale: Locale, key: &str) -> bool {
        self.names.contains(&template_name(locale, key))
    }

    fn resolve(&self, locale: Locale, key: &str) -> Result<String, TemplateError> {
        [locale, FALLBACK]
            .into_iter()
            .map(|candidate| template_name(candidate, key))
            .find(|name| self.names.contains(name))
            .ok_or_else(|| TemplateError::Missing(key.to_owned()))
    }
}

fn template_name(locale: Locale, key: &str) -> String {
    format!("{}.{key}", locale.as_str())
}

/// Builds a tera context from `name => value` pairs.
#[macro_export]
macro_rules! context {
    ($($name:literal => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut context = ::tera::Context::new();
        $(context.insert($name, &$value);)*
        context
    }};
}

fn prompt_template(prompt: &Prompt) -> (&'static str, Context) {
    match prompt {
        Prompt::ChooseLanguage => ("choose_language", Context::new()),
        Prompt::Welcome => ("welcome", Context::new()),
        Prompt::AskPlate => ("ask_plate", Context::new()),
        Prompt::InvalidPlate => ("invalid_plate", Context::new()),
        Prompt::AskOwnerName => ("ask_owner_name", Context::new()),
        Prompt::InvalidOwnerName => ("invalid_owner_name", Context::new()),
        Prompt::AskOwnership => ("ask_ownership", Context::new()),
        Prompt::AskCurbWeight => ("ask_curb_weight", Context::new()),
        Prompt::InvalidCurbWeight => ("invalid_curb_weight", Context::new()),
        Prompt::AskCompleteness => ("ask_completeness", Context::new()),
        Prompt::AskLogistics => ("ask_logistics", Context::new()),
        Prompt::AskTowLocation => ("ask_tow_location", Context::new()),
        Prompt::AskPhotos { max } => ("ask_photos", context! { "max" => max }),
        Prompt::PhotoReceived { count, max } => {
            ("photo_received", context! { "count" => count, "max" => max })
        }
        Prompt::PhotoLimitReached { max } => ("photo_limit_reached", context! { "max" => max }),
        Prompt::PhotosRequired { min } => ("photos_required", context! { "min" => min }),
        Prompt::AskCountryCode => ("ask_country_code", Context::new()),
        Prompt::InvalidCountryCode => ("invalid_country_code", Context::new()),
        Prompt::AskLocalNumber { country_code } => {
            ("ask_local_number", context! { "country_code" => country_code })
        }
        Prompt::InvalidPhone => ("invalid_phone", Context::new()),
        Prompt::Submitted { lead_id } => ("submitted", context! { "lead_id" => lead_id.0 }),
        Prompt::RetryLater => ("retry_later", Context::new()),
        Prompt::SessionReset => ("session_reset", Context::new()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use romupunkt_core::conversation::Prompt;
    use romupunkt_core::domain::{LeadId, Locale};

    use super::{Templates, BUNDLES};

    fn keys(source: &str) -> BTreeSet<String> {
        let table: toml::Table = toml::from_str(source).expect("bundle parses");
        table.keys().cloned().collect()
    }

    #[test]
    fn every_locale_defines_the_same_keys() {
        let english = keys(BUNDLES[0].1);
        for (locale, source) in BUNDLES {
            assert_eq!(keys(source), english, "locale {} diverges", locale.as_str());
        }
    }

    #[test]
    fn prompts_render_with_their_arguments() {
        let templates = Templates::new().expect("templates");

        let received = templates
            .prompt(Locale::En, &Prompt::PhotoReceived { count: 2, max: 4 })
            .expect("render");
        assert_eq!(received, "Photo 2 of 4 received.");

        let submitted =
            templates.prompt(Locale::Ee, &Prompt::Submitted { lead_id: LeadId(7) }).expect("render");
        assert!(submitted.contains("#7"));
    }

    #[test]
    fn every_prompt_has_copy_in_every_locale() {
        let templates = Templates::new().expect("templates");
        let prompts = [
            Prompt::ChooseLanguage,
            Prompt::Welcome,
            Prompt::AskPlate,
            Prompt::AskPhotos { max: 4 },
            Prompt::PhotoLimitReached { max: 4 },
            Prompt::PhotosRequired { min: 1 },
            Prompt::AskLocalNumber { country_code: "+372".to_owned() },
            Prompt::RetryLater,
            Prompt::SessionReset,
        ];
        for locale in Locale::ALL {
            for prompt in &prompts {
                let text = templates.prompt(locale, prompt).expect("render");
                assert!(!text.trim().is_empty());
            }
        }
    }

    #[test]
    fn lead_card_omits_unset_fields() {
        let templates = Templates::new().expect("templates");
        let context = crate::context! {
            "lead_id" => 7,
            "plate" => "123 ABC",
            "owner_name" => "Jaan",
            "is_owner" => Option::<String>::None,
            "phone" => "+37251234567",
            "curb_weight" => 1500,
            "completeness" => Option::<String>::None,
            "missing_parts" => Option::<String>::None,
            "transport" => "Self delivery",
            "location" => Option::<String>::None,
            "username" => "jaan",
            "photo_count" => 2,
        };

        let card = templates.render(Locale::En, "lead_card", &context).expect("render");

        assert!(card.starts_with("🏎️ Inquiry #7"));
        assert!(card.contains("Name: Jaan\nPhone: +37251234567"));
        assert!(card.contains("Transport: Self delivery"));
        assert!(!card.contains("Owner:"));
        assert!(card.ends_with("Photos: 2"));
    }

    #[test]
    fn unknown_key_is_reported() {
        let templates = Templates::new().expect("templates");
        assert!(templates.text(Locale::Ru, "no_such_key").is_err());
        assert!(templates.has(Locale::Ru, "ask_plate"));
    }
}
