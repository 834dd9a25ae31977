use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::{Client, Identity};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Authentication attached to a single gateway request.
#[derive(Debug, Clone, Copy)]
pub enum HttpAuth<'a> {
    None,
    Bearer(&'a str),
    Basic { username: &'a str, password: &'a str },
}

/// JSON HTTP client shared by the gateway adapters.
///
/// Every call is bounded by the configured timeout and is never retried here;
/// callers decide whether a failure is worth another attempt.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    gateway: String,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(
        gateway: impl Into<String>,
        timeout: Duration,
        identity: Option<Identity>,
    ) -> PaymentResult<Self> {
        let gateway = gateway.into();
        let mut builder = Client::builder().timeout(timeout);
        if let Some(identity) = identity {
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| PaymentError::configuration(&gateway, format!("failed to initialize HTTP client: {}", e)))?;

        Ok(Self {
            client,
            gateway,
            timeout,
        })
    }

    fn communication_error(&self, message: String, status: Option<u16>) -> PaymentError {
        PaymentError::GatewayCommunication {
            gateway: self.gateway.clone(),
            message,
            status,
        }
    }

    /// Send one request and decode the JSON reply.
    ///
    /// An empty 2xx body decodes as `null`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: HttpAuth<'_>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut request = self.client.request(method, url).timeout(self.timeout);

        request = match auth {
            HttpAuth::None => request,
            HttpAuth::Bearer(token) => request.bearer_auth(token),
            HttpAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
        };
        for (k, v) in additional_headers {
            request = request.header(*k, *v);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("request timed out after {}s: {}", self.timeout.as_secs(), e)
            } else {
                format!("request failed: {}", e)
            };
            warn!(gateway = %self.gateway, url = %url, error = %message, "gateway request failed");
            self.communication_error(message, None)
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.communication_error(format!("failed to read response body: {}", e), Some(status.as_u16())))?;

        if !status.is_success() {
            warn!(gateway = %self.gateway, url = %url, status = status.as_u16(), "gateway returned an error status");
            return Err(self.communication_error(
                format!("HTTP {}: {}", status, text),
                Some(status.as_u16()),
            ));
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str::<T>(text).map_err(|e| {
            self.communication_error(
                format!("invalid JSON response: {}; body: {}", e, text),
                Some(status.as_u16()),
            )
        })
    }
}

/// Read a required string credential from a gateway's JSON settings.
pub fn required_str(map: &JsonValue, key: &str, gateway: &str) -> PaymentResult<String> {
    optional_str(map, key).ok_or_else(|| {
        PaymentError::configuration(gateway, format!("missing credential '{}'", key))
    })
}

/// Read an optional, non-blank string from a gateway's JSON settings.
pub fn optional_str(map: &JsonValue, key: &str) -> Option<String> {
    map.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Read an optional unsigned integer, accepting numeric strings.
pub fn optional_u64(map: &JsonValue, key: &str) -> Option<u64> {
    match map.get(key)? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn only_digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Reduce a payer name to plain ASCII letters, digits and single spaces.
///
/// Stylised Unicode (mathematical alphanumerics, fullwidth and circled forms,
/// letterlike symbols) folds to its ASCII base letter, Portuguese accents lose
/// their diacritics, and anything else is dropped. The result is cut to
/// `max_len` characters.
pub fn sanitize_payer_name(name: &str, max_len: usize) -> String {
    let folded: String = name
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some(' ')
            } else {
                fold_char(c)
            }
        })
        .collect();

    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .chars()
        .take(max_len)
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn fold_char(c: char) -> Option<char> {
    if c.is_ascii_alphanumeric() {
        return Some(c);
    }

    let code = c as u32;
    let shifted = |base: u32, offset: u32| char::from_u32(base + offset);

    match code {
        // Mathematical alphanumeric letters: runs of A-Z followed by a-z
        0x1D400..=0x1D6A3 => {
            let idx = (code - 0x1D400) % 52;
            if idx < 26 {
                shifted('A' as u32, idx)
            } else {
                shifted('a' as u32, idx - 26)
            }
        }
        // Mathematical digits: five styles of 0-9
        0x1D7CE..=0x1D7FF => shifted('0' as u32, (code - 0x1D7CE) % 10),
        // Fullwidth digits and letters
        0xFF10..=0xFF19 | 0xFF21..=0xFF3A | 0xFF41..=0xFF5A => char::from_u32(code - 0xFEE0),
        // Circled letters and digits
        0x24B6..=0x24CF => shifted('A' as u32, code - 0x24B6),
        0x24D0..=0x24E9 => shifted('a' as u32, code - 0x24D0),
        0x2460..=0x2468 => shifted('1' as u32, code - 0x2460),
        0x24EA => Some('0'),
        _ => fold_named(c),
    }
}

fn fold_named(c: char) -> Option<char> {
    let folded = match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'é' | 'è' | 'ê' | 'ë' | 'ℯ' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' | 'ℰ' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' | 'ℐ' | 'ℑ' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'ℴ' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' | 'ℂ' | 'ℭ' => 'C',
        'ñ' => 'n',
        'Ñ' | 'ℕ' => 'N',
        'ℊ' => 'g',
        'ℎ' => 'h',
        'ℋ' | 'ℌ' | 'ℍ' => 'H',
        'ℒ' => 'L',
        'ℳ' => 'M',
        'ℙ' => 'P',
        'ℚ' => 'Q',
        'ℛ' | 'ℜ' | 'ℝ' => 'R',
        'ℤ' | 'ℨ' => 'Z',
        'ℬ' => 'B',
        'ℱ' => 'F',
        _ => return None,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_folds_stylised_unicode() {
        // Mathematical bold "Maria" and fullwidth "Silva"
        assert_eq!(sanitize_payer_name("𝐌𝐚𝐫𝐢𝐚 Ｓｉｌｖａ", 200), "Maria Silva");
        assert_eq!(sanitize_payer_name("ⓙⓞⓐⓞ", 200), "joao");
        assert_eq!(sanitize_payer_name("ℝ𝕠𝕤𝕒", 200), "Rosa");
    }

    #[test]
    fn sanitizer_strips_accents_and_symbols() {
        assert_eq!(
            sanitize_payer_name("  José  D'Ávila 🚀 Conceição ", 200),
            "Jose DAvila Conceicao"
        );
        assert_eq!(sanitize_payer_name("🔥🔥", 200), "");
    }

    #[test]
    fn sanitizer_truncates_to_max_length() {
        let name = "A".repeat(250);
        assert_eq!(sanitize_payer_name(&name, 200).len(), 200);
        assert_eq!(sanitize_payer_name("Ana Maria", 4), "Ana");
    }

    #[test]
    fn credentials_helpers_ignore_blank_values() {
        let map = serde_json::json!({"pix_key": "  ", "client_id": "id", "expiration_secs": "600"});

        assert_eq!(optional_str(&map, "pix_key"), None);
        assert!(required_str(&map, "pix_key", "efi").is_err());
        assert_eq!(required_str(&map, "client_id", "efi").unwrap(), "id");
        assert_eq!(optional_u64(&map, "expiration_secs"), Some(600));
    }

    #[test]
    fn only_digits_strips_formatting() {
        assert_eq!(only_digits("123.456.789-09"), "12345678909");
    }

    #[tokio::test]
    async fn non_success_status_surfaces_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/charge")
            .with_status(422)
            .with_body(r#"{"error":"valor inválido"}"#)
            .create_async()
            .await;

        let client = PaymentHttpClient::new("openpix", Duration::from_secs(5), None).unwrap();
        let result: PaymentResult<JsonValue> = client
            .request_json(
                reqwest::Method::POST,
                &format!("{}/charge", server.url()),
                HttpAuth::None,
                Some(&serde_json::json!({})),
                &[],
            )
            .await;

        match result {
            Err(PaymentError::GatewayCommunication { message, status, .. }) => {
                assert_eq!(status, Some(422));
                assert!(message.contains("valor inválido"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_success_body_decodes_as_null() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("PUT", "/webhook")
            .with_status(204)
            .create_async()
            .await;

        let client = PaymentHttpClient::new("efi", Duration::from_secs(5), None).unwrap();
        let value: JsonValue = client
            .request_json(
                reqwest::Method::PUT,
                &format!("{}/webhook", server.url()),
                HttpAuth::Bearer("token"),
                None,
                &[],
            )
            .await
            .unwrap();

        assert!(value.is_null());
    }
}
