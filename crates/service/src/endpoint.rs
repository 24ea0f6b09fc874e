use reqwest::Url;
use serde::Serialize;

use crate::errors::ConfigError;

/// Where a service can be reached: protocol, host, port and routing prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDescriptor {
    pub proto: String,
    pub ip: String,
    pub port: u16,
    pub base_url: String,
}

impl EndpointDescriptor {
    /// Parse a service URL. The port falls back to 80/443 for http/https;
    /// any other scheme must carry a port, even one equal to its usual default.
    pub fn from_url(service: &str, url: &str, base_url: &str) -> Result<Self, ConfigError> {
        let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
            service: service.to_string(),
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let proto = parsed.scheme().to_string();
        // `Url::port` hides an explicit port that matches the scheme default
        let explicit = parsed.port().or_else(|| {
            let known = parsed.port_or_known_default()?;
            has_explicit_port(url, known).then_some(known)
        });
        let port = match (explicit, proto.as_str()) {
            (Some(p), _) => p,
            (None, "http") => 80,
            (None, "https") => 443,
            _ => return Err(ConfigError::NoPort { service: service.to_string(), url: url.to_string() }),
        };
        let ip = parsed
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .unwrap_or_default();
        Ok(Self { proto, ip, port, base_url: base_url.to_string() })
    }

}

fn has_explicit_port(url: &str, port: u16) -> bool {
    let authority = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = authority.split(['/', '?', '#']).next().unwrap_or_default();
    authority.ends_with(&format!(":{port}"))
}

impl EndpointDescriptor {
    /// Address to connect to; wildcard binds are reached over loopback.
    pub fn connect_ip(&self) -> &str {
        match self.ip.as_str() {
            "" | "0.0.0.0" | "::" => "127.0.0.1",
            ip => ip,
        }
    }

    pub fn host(&self) -> String {
        let ip = self.connect_ip();
        if ip.contains(':') {
            format!("{}://[{}]:{}", self.proto, ip, self.port)
        } else {
            format!("{}://{}:{}", self.proto, ip, self.port)
        }
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.host(), self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_port_wins() {
        let ep = EndpointDescriptor::from_url("dash", "http://0.0.0.0:8080/", "/services/dash/").expect("valid");
        assert_eq!(ep.proto, "http");
        assert_eq!(ep.ip, "0.0.0.0");
        assert_eq!(ep.port, 8080);
        assert_eq!(ep.url(), "http://127.0.0.1:8080/services/dash/");
    }

    #[test]
    fn default_ports_by_scheme() {
        assert_eq!(EndpointDescriptor::from_url("a", "http://example.org", "/").expect("http").port, 80);
        assert_eq!(EndpointDescriptor::from_url("a", "https://example.org/x", "/").expect("https").port, 443);
    }

    #[test]
    fn unknown_scheme_without_port_fails() {
        let err = EndpointDescriptor::from_url("a", "tcp://example.org", "/").unwrap_err();
        assert!(matches!(err, ConfigError::NoPort { .. }));
        assert!(EndpointDescriptor::from_url("a", "tcp://example.org:9", "/").is_ok());
        assert!(matches!(
            EndpointDescriptor::from_url("a", "ws://example.org/", "/").unwrap_err(),
            ConfigError::NoPort { .. }
        ));
    }

    #[test]
    fn explicit_default_port_on_other_scheme_is_kept() {
        assert_eq!(EndpointDescriptor::from_url("a", "ws://example.org:80/", "/").expect("ws").port, 80);
        assert_eq!(EndpointDescriptor::from_url("a", "wss://example.org:443", "/").expect("wss").port, 443);
        assert_eq!(EndpointDescriptor::from_url("a", "ftp://example.org:21/pub", "/").expect("ftp").port, 21);
        assert_eq!(EndpointDescriptor::from_url("a", "http://example.org:80/", "/").expect("http").port, 80);
    }

    #[test]
    fn garbage_url_fails() {
        let err = EndpointDescriptor::from_url("a", "not a url", "/").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let ep = EndpointDescriptor::from_url("a", "http://[fd00::1]:9000/", "/p/").expect("v6");
        assert_eq!(ep.ip, "fd00::1");
        assert_eq!(ep.host(), "http://[fd00::1]:9000");
    }
}
