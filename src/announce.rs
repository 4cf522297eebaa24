//! Structured announcement record and the announcement assembler.
//!
//! The assembler validates an extracted record against the configured
//! required-field set and renders the canonical announcement text.
//! Formatting is string-only — no date parsing happens here.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Output of extraction. Absence (`None`) is a first-class value distinct
/// from an empty string; presence/absence drives required-field
/// validation, never type coercion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredAnnouncement {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub open_time: Option<String>,
    #[serde(default)]
    pub advance_price: Option<String>,
    #[serde(default)]
    pub door_price: Option<String>,
    #[serde(default)]
    pub ticket_link: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub organizer: Option<String>,
}

/// The announcement fields, addressable for required-field configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    EventName,
    Date,
    OpenTime,
    AdvancePrice,
    DoorPrice,
    TicketLink,
    Venue,
    Organizer,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::EventName,
        Field::Date,
        Field::OpenTime,
        Field::AdvancePrice,
        Field::DoorPrice,
        Field::TicketLink,
        Field::Venue,
        Field::Organizer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::EventName => "event_name",
            Field::Date => "date",
            Field::OpenTime => "open_time",
            Field::AdvancePrice => "advance_price",
            Field::DoorPrice => "door_price",
            Field::TicketLink => "ticket_link",
            Field::Venue => "venue",
            Field::Organizer => "organizer",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.name() == name)
    }
}

impl StructuredAnnouncement {
    /// Raw field access by `Field`.
    pub fn get(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::EventName => &self.event_name,
            Field::Date => &self.date,
            Field::OpenTime => &self.open_time,
            Field::AdvancePrice => &self.advance_price,
            Field::DoorPrice => &self.door_price,
            Field::TicketLink => &self.ticket_link,
            Field::Venue => &self.venue,
            Field::Organizer => &self.organizer,
        };
        value.as_deref()
    }
}

/// Fields required by default: ticket_link and organizer are optional.
pub const DEFAULT_REQUIRED: [Field; 6] = [
    Field::EventName,
    Field::Date,
    Field::OpenTime,
    Field::AdvancePrice,
    Field::DoorPrice,
    Field::Venue,
];

/// A validated, rendered announcement ready for dispatch.
#[derive(Debug, Clone)]
pub struct RenderedAnnouncement {
    pub content: String,
    /// True if a ticket link was present but suppressed by the denylist.
    pub link_suppressed: bool,
}

/// Validates extracted records and renders the announcement template.
#[derive(Debug, Clone)]
pub struct Assembler {
    required: Vec<Field>,
    link_denylist: Vec<String>,
}

impl Assembler {
    pub fn new(required: Vec<Field>, link_denylist: Vec<String>) -> Self {
        Self {
            required,
            link_denylist,
        }
    }

    /// Validate against the required-field set and render.
    ///
    /// A field counts as missing if it is absent OR empty after trimming.
    /// Link suppression is orthogonal to validation: a denylisted
    /// ticket_link still counts as present.
    pub fn assemble(
        &self,
        data: &StructuredAnnouncement,
    ) -> Result<RenderedAnnouncement, ValidationError> {
        let missing: Vec<&'static str> = self
            .required
            .iter()
            .filter(|f| is_blank(data.get(**f)))
            .map(|f| f.name())
            .collect();

        if !missing.is_empty() {
            return Err(ValidationError { missing });
        }

        let mut content = format!("【🎤{}🎤】\n\n", text(data.get(Field::EventName)));
        content.push_str(&format!(
            "◤{} {}\n",
            text(data.get(Field::Date)),
            text(data.get(Field::OpenTime)),
        ));
        content.push_str(&format!(
            "◤adv ¥{} / door ¥{}+1d\n",
            text(data.get(Field::AdvancePrice)),
            text(data.get(Field::DoorPrice)),
        ));

        let mut link_suppressed = false;
        if let Some(link) = data.get(Field::TicketLink).filter(|l| !l.trim().is_empty()) {
            if self.link_allowed(link) {
                content.push_str(&format!("◤ticket ▶︎ {}\n", link.trim()));
            } else {
                link_suppressed = true;
            }
        }

        content.push_str(&format!("◤at {}", text(data.get(Field::Venue))));

        if let Some(organizer) = data.get(Field::Organizer).filter(|o| !o.trim().is_empty()) {
            content.push_str(&format!("\n◤主催： {}", organizer.trim()));
        }

        Ok(RenderedAnnouncement {
            content,
            link_suppressed,
        })
    }

    /// A ticket link is included only if its host is not a denylisted
    /// domain or a subdomain of one. Links without a parseable host are
    /// passed through — formatting here is string-only.
    fn link_allowed(&self, link: &str) -> bool {
        let Some(host) = host_of(link) else {
            return true;
        };
        !self
            .link_denylist
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED.to_vec(), Vec::new())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn text(value: Option<&str>) -> &str {
    value.map(str::trim).unwrap_or("")
}

/// Extract the lowercased host from a URL, tolerating a missing scheme.
fn host_of(link: &str) -> Option<String> {
    let trimmed = link.trim();
    let url = reqwest::Url::parse(trimmed)
        .or_else(|_| reqwest::Url::parse(&format!("https://{trimmed}")))
        .ok()?;
    url.host_str().map(str::to_ascii_lowercase)
}
