//! Registry response parsing.
//!
//! Accepts the nested form (`uniteLegale` / `etablissement` objects whose
//! history lives in `periodes*` arrays) and a flat object carrying the status
//! field directly. Status `A` means active; any other code means closed.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::identifier::{Identifier, IdentifierClass};
use crate::registry::types::{Address, RecordKind, RegistryRecord};

const ACTIVE: &str = "A";

struct Shape {
    kind: RecordKind,
    root_key: &'static str,
    status_key: &'static str,
    periods_key: &'static str,
    created_key: &'static str,
}

const LEGAL_UNIT: Shape = Shape {
    kind: RecordKind::LegalUnit,
    root_key: "uniteLegale",
    status_key: "etatAdministratifUniteLegale",
    periods_key: "periodesUniteLegale",
    created_key: "dateCreationUniteLegale",
};

const ESTABLISHMENT: Shape = Shape {
    kind: RecordKind::Establishment,
    root_key: "etablissement",
    status_key: "etatAdministratifEtablissement",
    periods_key: "periodesEtablissement",
    created_key: "dateCreationEtablissement",
};

fn text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn date(value: &Value, key: &str) -> Option<NaiveDate> {
    text(value, key).and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

/// The open period (no end date), else the first listed.
fn current_period<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    let periods = root.get(key)?.as_array()?;
    periods
        .iter()
        .find(|p| p.get("dateFin").map_or(true, Value::is_null))
        .or_else(|| periods.first())
}

fn legal_unit_name(unit: &Value, period: Option<&Value>) -> Option<String> {
    let sources = [Some(unit), period];
    for source in sources.into_iter().flatten() {
        if let Some(name) = text(source, "denominationUniteLegale") {
            return Some(name.to_string());
        }
    }
    // Sole proprietorships carry a person's name instead.
    let last = sources
        .into_iter()
        .flatten()
        .find_map(|s| text(s, "nomUniteLegale"))?;
    match text(unit, "prenom1UniteLegale") {
        Some(first) => Some(format!("{} {}", first, last)),
        None => Some(last.to_string()),
    }
}

fn establishment_name(root: &Value, period: Option<&Value>) -> Option<String> {
    if let Some(period) = period {
        for key in ["denominationUsuelleEtablissement", "enseigne1Etablissement"] {
            if let Some(name) = text(period, key) {
                return Some(name.to_string());
            }
        }
    }
    root.get("uniteLegale")
        .and_then(|unit| legal_unit_name(unit, None))
}

fn establishment_address(root: &Value) -> Option<Address> {
    let raw = root.get("adresseEtablissement")?;
    let street: Vec<&str> = [
        "numeroVoieEtablissement",
        "typeVoieEtablissement",
        "libelleVoieEtablissement",
    ]
    .iter()
    .filter_map(|key| text(raw, key))
    .collect();

    let address = Address {
        street: (!street.is_empty()).then(|| street.join(" ")),
        postal_code: text(raw, "codePostalEtablissement").map(str::to_string),
        city: text(raw, "libelleCommuneEtablissement").map(str::to_string),
    };
    (address != Address::default()).then_some(address)
}

/// Build a [`RegistryRecord`] from a 200 body.
///
/// Fails when the body is not JSON or carries no administrative status.
pub fn parse_record(
    identifier: &Identifier,
    body: &str,
    retrieved_at: DateTime<Utc>,
) -> Result<RegistryRecord, String> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("body is not JSON: {}", e))?;

    let shape = match identifier.class() {
        IdentifierClass::Company => &LEGAL_UNIT,
        IdentifierClass::Establishment => &ESTABLISHMENT,
    };
    let root = value.get(shape.root_key).unwrap_or(&value);
    let period = current_period(root, shape.periods_key);

    let status = text(root, shape.status_key)
        .or_else(|| period.and_then(|p| text(p, shape.status_key)))
        .ok_or_else(|| format!("missing {}", shape.status_key))?;
    let is_active = status == ACTIVE;

    let closed_on = if is_active {
        None
    } else {
        period.and_then(|p| date(p, "dateDebut"))
    };

    let (name, address) = match shape.kind {
        RecordKind::LegalUnit => (legal_unit_name(root, period), None),
        RecordKind::Establishment => (
            establishment_name(root, period),
            establishment_address(root),
        ),
    };

    Ok(RegistryRecord {
        identifier: identifier.as_str().to_string(),
        kind: shape.kind,
        name,
        is_active,
        status_code: status.to_string(),
        created_on: date(root, shape.created_key),
        closed_on,
        address,
        retrieved_at,
    })
}
