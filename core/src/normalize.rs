//! Maps the upstream's loosely-shaped JSON onto the console's records.
//!
//! Field resolution goes through the ordered key lists in [`aliases`]; the
//! first key holding a usable value wins. Records that cannot be salvaged are
//! dropped from lists rather than failing the response.

use serde_json::{Map, Value};
use tracing::debug;

use crate::model::{
    DashboardView, Kpis, MapPoint, MapView, SeriesPoint, Ticket, TicketPriority, TicketStatus,
};

/// Ordered candidate keys, first match wins.
pub mod aliases {
    pub type Aliases = &'static [&'static str];

    pub const ENVELOPE: Aliases = &["data", "result", "payload", "response"];
    pub const ACCESS_TOKEN: Aliases = &["access_token", "accessToken", "token"];

    pub const TICKET_LIST: Aliases = &["items", "data", "results", "tickets"];
    pub const TICKET_ID: Aliases = &["id", "_id", "uuid"];
    pub const TICKET_REF: Aliases = &["ticketId", "ticket_id", "code"];
    pub const CLIENT: Aliases = &["client", "clientName", "client_name", "customer"];
    pub const EMAIL: Aliases = &["email", "clientEmail", "client_email"];
    pub const SUBJECT: Aliases = &["subject", "title"];
    pub const PRIORITY: Aliases = &["priority"];
    pub const STATUS: Aliases = &["status"];
    pub const RESPONSIBLE: Aliases = &["responsible", "assignee", "owner"];
    pub const CREATED_AT: Aliases = &["createdAt", "created_at", "created"];
    pub const UPDATED_AT: Aliases = &["updatedAt", "updated_at", "updated"];

    pub const PAGINATION_META: Aliases = &[
        "total_pages",
        "totalPages",
        "total_items",
        "totalItems",
        "page",
        "pageSize",
        "page_size",
    ];
    pub const PAGE: Aliases = &["page", "currentPage", "current_page"];
    pub const PAGE_SIZE: Aliases = &["pageSize", "page_size", "perPage", "limit"];
    pub const TOTAL_ITEMS: Aliases = &["totalItems", "total_items", "total", "count"];
    pub const TOTAL_PAGES: Aliases = &["totalPages", "total_pages", "pages"];
    pub const STATS_TOTAL: Aliases = &["total_items", "totalItems", "total", "count"];

    pub const KPIS_TREND: &str = "kpisTrend";
    pub const ARPU_TREND: &str = "arpuTrend";
    pub const CONVERSION_TREND: &str = "conversionTrend";
    pub const CHURN_TREND: &str = "churnTrend";
    pub const RETENTION_TREND: &str = "retentionTrend";
    pub const CONVERSION_BARS: Aliases = &["conversionBars", "conversion_bars", "bars", "conversion"];
    pub const POINT_LABEL: Aliases = &["label", "month", "name"];
    pub const POINT_VALUE: Aliases = &["value", "amount", "y"];

    pub const PLACE: Aliases = &["name", "place"];
}

pub const DEFAULT_MAP_CENTER: [f64; 2] = [-51.2177, -30.0346];
pub const DEFAULT_MAP_ZOOM: f64 = 9.0;

// Lookup primitives -----------------------------------------------------------

/// Strip one `{data|result|payload|response: ...}` wrapper, if any.
pub fn unwrap_envelope(value: &Value) -> &Value {
    match value {
        Value::Object(map) => aliases::ENVELOPE
            .iter()
            .find_map(|key| map.get(*key))
            .unwrap_or(value),
        _ => value,
    }
}

/// First alias present on the object, whatever its type.
pub fn pick_value<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let map = value.as_object()?;
    keys.iter().find_map(|key| map.get(*key))
}

/// First alias holding an array.
pub fn pick_array<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    let map = value.as_object()?;
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_array))
}

/// Strings only.
pub fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// Strings, or finite numbers rendered as text.
pub fn read_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            let rendered = n.to_string();
            n.as_f64().filter(|f| f.is_finite()).map(|_| rendered)
        }
        _ => None,
    }
}

/// Numbers or numeric strings; anything non-finite is absent.
pub fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().ok()?
            }
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn first_with<T>(
    value: &Value,
    keys: &[&str],
    read: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let map = value.as_object()?;
    keys.iter().find_map(|key| map.get(*key).and_then(&read))
}

// Tickets ---------------------------------------------------------------------

/// Normalize one upstream ticket record. `None` when it has no usable id.
pub fn normalize_ticket(input: &Value) -> Option<Ticket> {
    if !input.is_object() {
        return None;
    }

    let text = |keys: &[&str]| first_with(input, keys, as_string).unwrap_or_default();

    let id = first_with(input, aliases::TICKET_ID, read_string)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())?;

    let priority = first_with(input, aliases::PRIORITY, as_string)
        .and_then(|p| TicketPriority::parse(&p))
        .unwrap_or_default();
    let status = first_with(input, aliases::STATUS, as_string)
        .and_then(|s| TicketStatus::parse(&s))
        .unwrap_or_default();

    Some(Ticket {
        id,
        ticket_id: first_with(input, aliases::TICKET_REF, read_string).unwrap_or_default(),
        client: text(aliases::CLIENT),
        email: text(aliases::EMAIL),
        subject: text(aliases::SUBJECT),
        priority,
        status,
        responsible: text(aliases::RESPONSIBLE),
        created_at: text(aliases::CREATED_AT),
        updated_at: text(aliases::UPDATED_AT),
    })
}

/// A normalized ticket list plus the object it was found in, which is where
/// pagination metadata lives.
#[derive(Debug, Clone)]
pub struct TicketListing<'a> {
    pub items: Vec<Ticket>,
    pub container: Option<&'a Map<String, Value>>,
}

/// Accepts a bare array, `{items|data|results|tickets: [...]}`, or either of
/// those inside one envelope.
pub fn ticket_listing(payload: &Value) -> TicketListing<'_> {
    let (raw, container) = locate_list(payload);
    let raw = raw.map(Vec::as_slice).unwrap_or_default();

    let items: Vec<Ticket> = raw.iter().filter_map(normalize_ticket).collect();
    if items.len() < raw.len() {
        debug!(
            dropped = raw.len() - items.len(),
            "dropped ticket records without an id"
        );
    }

    TicketListing { items, container }
}

/// Shorthand for callers that only need the records.
pub fn normalize_ticket_list(payload: &Value) -> Vec<Ticket> {
    ticket_listing(payload).items
}

fn locate_list(payload: &Value) -> (Option<&Vec<Value>>, Option<&Map<String, Value>>) {
    let root = match payload {
        Value::Array(items) => return (Some(items), None),
        Value::Object(map) => map,
        _ => return (None, None),
    };

    if let Some(items) = pick_array(payload, aliases::TICKET_LIST) {
        return (Some(items), Some(root));
    }

    let inner = unwrap_envelope(payload);
    match inner {
        Value::Array(items) => (Some(items), Some(root)),
        Value::Object(map) => (pick_array(inner, aliases::TICKET_LIST), Some(map)),
        _ => (None, Some(root)),
    }
}

/// A created ticket, or `None` when the reply is not a recognizable record.
pub fn normalize_single_ticket(payload: &Value) -> Option<Ticket> {
    normalize_ticket(payload).or_else(|| normalize_ticket(unwrap_envelope(payload)))
}

// Dashboard -------------------------------------------------------------------

pub fn normalize_dashboard(input: &Value) -> DashboardView {
    let root = unwrap_envelope(input);
    if !root.is_object() {
        return DashboardView::default();
    }

    let trend = root.get(aliases::KPIS_TREND).filter(|v| v.is_object());
    let labels: &[Value] = trend
        .and_then(|t| t.get("labels"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let series = |key: &str| -> Vec<SeriesPoint> {
        let data: &[Value] = trend
            .and_then(|t| t.get(key))
            .and_then(|k| k.get("data"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        zip_series(labels, data)
    };

    let kpis = Kpis {
        retention: series(aliases::RETENTION_TREND),
        conversion: series(aliases::CONVERSION_TREND),
        churn: series(aliases::CHURN_TREND),
        arpu: series(aliases::ARPU_TREND),
    };

    let conversion_bars = aliases::CONVERSION_BARS
        .iter()
        .filter_map(|key| root.get(*key).and_then(Value::as_array))
        .map(|items| to_series(items))
        .find(|series| !series.is_empty())
        .unwrap_or_else(|| kpis.conversion.clone());

    DashboardView {
        kpis,
        conversion_bars,
    }
}

/// Pair `labels[i]` with `data[i]`, stopping at the shorter of the two.
fn zip_series(labels: &[Value], data: &[Value]) -> Vec<SeriesPoint> {
    labels
        .iter()
        .zip(data)
        .enumerate()
        .map(|(i, (label, value))| SeriesPoint {
            label: read_string(label).unwrap_or_else(|| i.to_string()),
            value: as_number(value).unwrap_or(0.0),
        })
        .collect()
}

fn to_series(items: &[Value]) -> Vec<SeriesPoint> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(_) => SeriesPoint {
                label: first_with(item, aliases::POINT_LABEL, read_string)
                    .unwrap_or_else(|| i.to_string()),
                value: first_with(item, aliases::POINT_VALUE, as_number).unwrap_or(0.0),
            },
            other => SeriesPoint {
                label: i.to_string(),
                value: as_number(other).unwrap_or(0.0),
            },
        })
        .collect()
}

// Map -------------------------------------------------------------------------

pub fn normalize_map(input: &Value) -> MapView {
    let data = unwrap_envelope(unwrap_envelope(input));

    let mut view = MapView {
        center: DEFAULT_MAP_CENTER,
        zoom: DEFAULT_MAP_ZOOM,
        locations: Vec::new(),
    };

    if !data.is_object() {
        return view;
    }

    if let Some(center) = data.get("center").and_then(coordinate_pair) {
        view.center = center;
    }

    if let Some(zoom) = data.get("zoom").and_then(as_number).filter(|z| *z > 0.0) {
        view.zoom = zoom;
    }

    view.locations = data
        .get("locations")
        .and_then(Value::as_array)
        .map(|locations| {
            locations
                .iter()
                .enumerate()
                .filter_map(|(i, item)| map_point(i, item))
                .collect()
        })
        .unwrap_or_default();

    view
}

fn coordinate_pair(value: &Value) -> Option<[f64; 2]> {
    match value.as_array()?.as_slice() {
        [lng, lat] => Some([as_number(lng)?, as_number(lat)?]),
        _ => None,
    }
}

fn map_point(index: usize, item: &Value) -> Option<MapPoint> {
    if !item.is_object() {
        return None;
    }

    let [lng, lat] = item.get("coordinates").and_then(coordinate_pair)?;

    Some(MapPoint {
        id: item
            .get("id")
            .and_then(read_string)
            .unwrap_or_else(|| index.to_string()),
        lat,
        lng,
        kind: item
            .get("type")
            .and_then(read_string)
            .unwrap_or_else(|| "default".to_string()),
        place: first_with(item, aliases::PLACE, read_string).filter(|p| !p.is_empty()),
    })
}
