use crate::{
    errors::{Result, SentinelError},
    models::{Contact, WhoisInfo},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

const NOT_FOUND_MARKERS: [&str; 5] = [
    "no match for",
    "not found",
    "no data found",
    "no entries found",
    "domain not found",
];

/// Turns free-form WHOIS text into a [`WhoisInfo`].
///
/// Registries disagree on key names, so fields are recognised by keyword
/// rather than exact key. The first value seen wins for single-valued
/// fields.
#[derive(Debug, Default, Clone)]
pub struct WhoisParser;

#[derive(Clone, Copy)]
enum Role {
    Registrant,
    Administrative,
    Technical,
}

impl WhoisParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, domain: &str, text: &str) -> Result<WhoisInfo> {
        let lowered = text.to_lowercase();
        if text.trim().is_empty() {
            return Err(SentinelError::Whois("WHOIS parsing failed: empty response".to_string()));
        }

        let mut info = WhoisInfo {
            domain_name: domain.to_string(),
            ..WhoisInfo::default()
        };
        let mut recognised = 0usize;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') || line.starts_with('#') || line.starts_with(">>>") {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            if self.apply_field(&mut info, &key, value) {
                recognised += 1;
            }
        }

        if recognised == 0 {
            let reason = if NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
                "domain is not registered"
            } else {
                "no registration data found"
            };
            return Err(SentinelError::Whois(format!("WHOIS parsing failed: {}", reason)));
        }

        Ok(info)
    }

    fn apply_field(&self, info: &mut WhoisInfo, key: &str, value: &str) -> bool {
        // Date keys first: "Registrar Registration Expiration Date" is an expiry
        if key.contains("expir") {
            set_date(&mut info.expiry_date, value);
            return true;
        }
        if key.contains("creation") || key.contains("created") || key == "registered" {
            set_date(&mut info.created_date, value);
            return true;
        }
        if key.contains("updated") || key.contains("modified") || key.contains("changed") {
            set_date(&mut info.last_updated, value);
            return true;
        }

        if key == "registrar" || key == "registrar name" || key == "sponsoring registrar" {
            info.registrar.get_or_insert_with(|| value.to_string());
            return true;
        }

        if key.contains("name server") || key == "nserver" || key == "nameserver" || key == "ns" {
            let host = value
                .split_whitespace()
                .next()
                .unwrap_or(value)
                .trim_end_matches('.')
                .to_lowercase();
            if !info.name_servers.contains(&host) {
                info.name_servers.push(host);
            }
            return true;
        }

        if key == "dnssec" {
            let value = value.to_lowercase();
            info.dnssec = value.starts_with("signed") || value == "yes" || value == "active";
            return true;
        }

        if key.contains("status") {
            let status = value.split_whitespace().next().unwrap_or(value).to_string();
            if !info.status.contains(&status) {
                info.status.push(status);
            }
            return true;
        }

        if let Some((role, field)) = contact_key(key) {
            let contact = match role {
                Role::Registrant => &mut info.registrant,
                Role::Administrative => &mut info.administrative,
                Role::Technical => &mut info.technical,
            };
            return apply_contact_field(contact, field, value);
        }

        false
    }
}

fn contact_key(key: &str) -> Option<(Role, &str)> {
    let prefixes = [
        ("registrant", Role::Registrant),
        ("administrative contact", Role::Administrative),
        ("administrative", Role::Administrative),
        ("admin", Role::Administrative),
        ("technical contact", Role::Technical),
        ("technical", Role::Technical),
        ("tech", Role::Technical),
    ];
    prefixes
        .iter()
        .find_map(|(prefix, role)| key.strip_prefix(prefix).map(|rest| (*role, rest.trim())))
}

fn apply_contact_field(contact: &mut Contact, field: &str, value: &str) -> bool {
    if value.to_lowercase().contains("select request") || value.to_lowercase().contains("redacted") {
        return true;
    }

    let slot = match field {
        f if f.contains("ext") || f.contains("fax") => return true,
        f if f.contains("organization") || f.contains("organisation") || f == "org" => &mut contact.organization,
        f if f.contains("name") || f.is_empty() => &mut contact.name,
        f if f.contains("street") || f.contains("address") => {
            match contact.street.as_mut() {
                Some(street) => {
                    street.push_str(", ");
                    street.push_str(value);
                }
                None => contact.street = Some(value.to_string()),
            }
            return true;
        }
        f if f.contains("city") => &mut contact.city,
        f if f.contains("state") || f.contains("province") => &mut contact.province,
        f if f.contains("postal") || f.contains("zip") => &mut contact.postal_code,
        f if f.contains("country") => &mut contact.country,
        f if f.contains("phone") => &mut contact.phone,
        f if f.contains("email") || f.contains("e-mail") => &mut contact.email,
        _ => return false,
    };
    slot.get_or_insert_with(|| value.to_string());
    true
}

fn set_date(slot: &mut Option<DateTime<Utc>>, value: &str) {
    if slot.is_none() {
        *slot = parse_date(value);
    }
}

/// Parses the date formats registries commonly emit.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let with_offset = ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S %z"];
    for format in with_offset {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = [
        "%Y-%m-%dT%H:%M:%S%.fZ", // 2025-05-18T13:36:06.0Z
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y.%m.%d %H:%M:%S",
    ];
    for format in naive {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    let date_only = ["%Y-%m-%d", "%d-%b-%Y", "%d %b %Y", "%Y/%m/%d", "%d/%m/%Y", "%d.%m.%Y", "%Y.%m.%d"];
    for format in date_only {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
            }
        }
    }

    debug!("Failed to parse date: {}", value);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    const VERISIGN_STYLE: &str = "\
   Domain Name: EXAMPLE.COM
   Registry Domain ID: 2336799_DOMAIN_COM-VRSN
   Registrar WHOIS Server: whois.example-registrar.com
   Updated Date: 2024-08-14T07:01:34Z
   Creation Date: 1995-08-14T04:00:00Z
   Registry Expiry Date: 2025-08-13T04:00:00Z
   Registrar: Example Registrar, Inc.
   Domain Status: clientDeleteProhibited https://icann.org/epp#clientDeleteProhibited
   Domain Status: clientTransferProhibited https://icann.org/epp#clientTransferProhibited
   Name Server: A.IANA-SERVERS.NET
   Name Server: B.IANA-SERVERS.NET
   DNSSEC: signedDelegation
Registrant Name: Jane Doe
Registrant Organization: Example Org
Registrant Street: 1 Main St
Registrant Street: Suite 2
Registrant City: Springfield
Registrant State/Province: CA
Registrant Postal Code: 90000
Registrant Country: US
Registrant Phone: +1.5555550100
Registrant Phone Ext:
Registrant Email: jane@example.com
Admin Email: admin@example.com
Tech Organization: REDACTED FOR PRIVACY
Tech Email: tech@example.com
>>> Last update of whois database: 2024-09-01T00:00:00Z <<<
";

    #[test]
    fn test_parses_registry_fields() {
        let info = WhoisParser::new().parse("example.com", VERISIGN_STYLE).unwrap();

        assert_eq!(info.domain_name, "example.com");
        assert_eq!(info.registrar.as_deref(), Some("Example Registrar, Inc."));
        assert_eq!(info.created_date, Some(Utc.with_ymd_and_hms(1995, 8, 14, 4, 0, 0).unwrap()));
        assert_eq!(info.expiry_date.unwrap().year(), 2025);
        assert_eq!(info.last_updated.unwrap().month(), 8);
        assert_eq!(info.name_servers, vec!["a.iana-servers.net", "b.iana-servers.net"]);
        assert_eq!(info.status, vec!["clientDeleteProhibited", "clientTransferProhibited"]);
        assert!(info.dnssec);
    }

    #[test]
    fn test_parses_contact_blocks() {
        let info = WhoisParser::new().parse("example.com", VERISIGN_STYLE).unwrap();

        let registrant = &info.registrant;
        assert_eq!(registrant.name.as_deref(), Some("Jane Doe"));
        assert_eq!(registrant.organization.as_deref(), Some("Example Org"));
        assert_eq!(registrant.street.as_deref(), Some("1 Main St, Suite 2"));
        assert_eq!(registrant.city.as_deref(), Some("Springfield"));
        assert_eq!(registrant.province.as_deref(), Some("CA"));
        assert_eq!(registrant.postal_code.as_deref(), Some("90000"));
        assert_eq!(registrant.country.as_deref(), Some("US"));
        assert_eq!(registrant.phone.as_deref(), Some("+1.5555550100"));
        assert_eq!(registrant.email.as_deref(), Some("jane@example.com"));

        assert_eq!(info.administrative.email.as_deref(), Some("admin@example.com"));
        assert!(info.technical.organization.is_none());
        assert_eq!(info.technical.email.as_deref(), Some("tech@example.com"));
    }

    #[test]
    fn test_unregistered_domain_is_error() {
        let result = WhoisParser::new().parse("nope.com", "No match for \"NOPE.COM\".\n");
        match result {
            Err(SentinelError::Whois(message)) => assert!(message.contains("not registered")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_empty_response_is_error() {
        assert!(WhoisParser::new().parse("x.com", "  \n").is_err());
    }

    #[test]
    fn test_date_formats() {
        assert!(parse_date("2025-05-18T13:36:06.0Z").is_some());
        assert!(parse_date("2025-05-18 13:36:06").is_some());
        assert!(parse_date("18-May-2025").is_some());
        assert!(parse_date("2025/05/18").is_some());
        assert!(parse_date("18.05.2025").is_some());
        assert!(parse_date("before the war").is_none());
    }
}
