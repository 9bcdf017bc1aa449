use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum TicketPriority {
    #[serde(rename = "Baixa")]
    Low,
    #[default]
    #[serde(rename = "Média")]
    Medium,
    #[serde(rename = "Alta")]
    High,
    #[serde(rename = "Urgente")]
    Urgent,
}

impl TicketPriority {
    pub fn label(self) -> &'static str {
        match self {
            TicketPriority::Low => "Baixa",
            TicketPriority::Medium => "Média",
            TicketPriority::High => "Alta",
            TicketPriority::Urgent => "Urgente",
        }
    }

    /// Accepts the console labels and the upstream's machine codes.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Baixa" | "low" => Some(TicketPriority::Low),
            "Média" | "medium" => Some(TicketPriority::Medium),
            "Alta" | "high" => Some(TicketPriority::High),
            "Urgente" | "urgent" => Some(TicketPriority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum TicketStatus {
    #[default]
    #[serde(rename = "Aberto")]
    Open,
    #[serde(rename = "Em andamento")]
    InProgress,
    #[serde(rename = "Fechado")]
    Closed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 3] = [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::Closed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TicketStatus::Open => "Aberto",
            TicketStatus::InProgress => "Em andamento",
            TicketStatus::Closed => "Fechado",
        }
    }

    /// Code the upstream expects in its `status` query filter.
    pub fn upstream_code(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Closed => "done",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Aberto" | "open" => Some(TicketStatus::Open),
            "Em andamento" | "in_progress" => Some(TicketStatus::InProgress),
            "Fechado" | "done" | "closed" => Some(TicketStatus::Closed),
            _ => None,
        }
    }
}

// Inbound bodies may carry either the console label or the upstream code.
impl<'de> Deserialize<'de> for TicketPriority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TicketPriority::parse(&raw)
            .ok_or_else(|| de::Error::custom(format!("unknown priority `{raw}`")))
    }
}

impl<'de> Deserialize<'de> for TicketStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TicketStatus::parse(&raw)
            .ok_or_else(|| de::Error::custom(format!("unknown status `{raw}`")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub ticket_id: String,
    pub client: String,
    pub email: String,
    pub subject: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub responsible: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Ticket {
    /// Text searched by the `q` filter.
    pub fn haystack(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.id, self.ticket_id, self.client, self.email, self.subject
        )
        .trim()
        .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPage {
    pub items: Vec<Ticket>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

/// Body of `POST /tickets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicket {
    pub ticket_id: String,
    pub client: String,
    pub email: String,
    pub subject: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub responsible: String,
}

/// Body of `PATCH /tickets/{id}`; absent fields are left alone upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TicketPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
    /// Fields the console does not model, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub open: u64,
    pub in_progress: u64,
    pub done: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Kpis {
    pub retention: Vec<SeriesPoint>,
    pub conversion: Vec<SeriesPoint>,
    pub churn: Vec<SeriesPoint>,
    pub arpu: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub kpis: Kpis,
    pub conversion_bars: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    /// `[lng, lat]`
    pub center: [f64; 2],
    pub zoom: f64,
    pub locations: Vec<MapPoint>,
}
