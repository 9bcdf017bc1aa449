use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{json, Value};

/// An unsigned JWT-shaped token whose claims carry `email` and `name`.
pub fn session_token(email: &str, name: Option<&str>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let mut claims = json!({ "sub": "42", "email": email });
    if let Some(name) = name {
        claims["name"] = json!(name);
    }
    let claims = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{claims}.signature")
}

/// Upstream-shaped ticket record using snake_case aliases and machine codes.
pub fn upstream_ticket(index: usize) -> Value {
    let status = ["open", "in_progress", "done"][index % 3];
    let subject = if index % 4 == 0 {
        "Erro no pagamento"
    } else {
        "Acesso bloqueado"
    };

    json!({
        "id": format!("t-{index}"),
        "ticket_id": format!("TK{index:03}"),
        "client_name": format!("Cliente {index}"),
        "client_email": format!("cliente{index}@example.com"),
        "title": subject,
        "priority": "high",
        "status": status,
        "assignee": "Ana",
        "created_at": "2024-05-01T10:00:00Z",
    })
}

pub fn upstream_tickets(count: usize) -> Vec<Value> {
    (0..count).map(upstream_ticket).collect()
}

pub fn dashboard_payload() -> Value {
    json!({
        "data": {
            "kpisTrend": {
                "labels": ["Jan", "Fev", "Mar"],
                "arpuTrend": { "data": [10.5, 11, 12] },
                "conversionTrend": { "data": ["0.2", 0.3, 0.4] },
                "churnTrend": { "data": [1, 2] },
                "retentionTrend": { "data": [90, 91, 92, 93] }
            },
            "conversionBars": [
                { "month": "Jan", "amount": 5 },
                { "label": "Fev", "value": "7" }
            ]
        }
    })
}

pub fn map_payload() -> Value {
    json!({
        "data": {
            "data": {
                "center": [-46.6, -23.5],
                "zoom": 11,
                "locations": [
                    { "id": "a", "coordinates": [-46.6, -23.5], "type": "branch", "name": "Paulista" },
                    { "id": "b", "coordinates": [-46.6] },
                    { "coordinates": ["-46.7", "-23.6"] }
                ]
            }
        }
    })
}
