use std::fmt;

use reqwest::Url;
use serde::Serialize;
use uuid::Uuid;

use crate::endpoint::EndpointDescriptor;
use crate::spec::ServiceSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    KubeManaged,
    SubprocessManaged,
    External,
}

impl ServiceKind {
    pub fn of(spec: &ServiceSpec) -> Self {
        if spec.is_kube_managed() {
            ServiceKind::KubeManaged
        } else if spec.is_subprocess_managed() {
            ServiceKind::SubprocessManaged
        } else {
            ServiceKind::External
        }
    }

    pub fn is_managed(self) -> bool { !matches!(self, ServiceKind::External) }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceKind::KubeManaged => "kube managed",
            ServiceKind::SubprocessManaged => "subprocess managed",
            ServiceKind::External => "external",
        })
    }
}

/// URL layout shared by every service of one hub.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostContext {
    pub base_url: String,
    /// `services.<domain>` when subdomain hosting is on, else empty.
    pub domain: String,
    /// `<scheme>://services.<netloc>` when subdomain hosting is on, else empty.
    pub host: String,
}

impl HostContext {
    pub fn new(base_url: &str, subdomain_host: &str) -> Self {
        let (domain, host) = match Url::parse(subdomain_host) {
            Ok(parsed) if !subdomain_host.is_empty() => {
                let netloc = match (parsed.host_str(), parsed.port()) {
                    (Some(h), Some(p)) => format!("{h}:{p}"),
                    (Some(h), None) => h.to_string(),
                    (None, _) => String::new(),
                };
                let domain = parsed.host_str().map(|h| format!("services.{h}")).unwrap_or_default();
                (domain, format!("{}://services.{}", parsed.scheme(), netloc))
            }
            _ => (String::new(), String::new()),
        };
        Self { base_url: base_url.to_string(), domain, host }
    }

    pub fn prefix_for(&self, name: &str) -> String {
        format!("{}services/{}/", self.base_url, name)
    }
}

/// One entry of the service registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRecord {
    /// Primary key of the persisted service row.
    pub id: Uuid,
    pub spec: ServiceSpec,
    pub url: Option<String>,
    pub api_token: Option<String>,
    /// Set when the token was generated by the hub rather than configured.
    pub token_generated: bool,
    pub endpoint: Option<EndpointDescriptor>,
    pub prefix: String,
    pub domain: String,
    pub host: String,
}

impl ServiceRecord {
    pub fn new(id: Uuid, spec: ServiceSpec, hosts: &HostContext) -> Self {
        let prefix = hosts.prefix_for(&spec.name);
        Self {
            id,
            url: spec.url.clone(),
            api_token: spec.api_token.clone(),
            token_generated: false,
            endpoint: None,
            prefix,
            domain: hosts.domain.clone(),
            host: hosts.host.clone(),
            spec,
        }
    }

    pub fn name(&self) -> &str { &self.spec.name }

    pub fn kind(&self) -> ServiceKind { ServiceKind::of(&self.spec) }

    pub fn managed(&self) -> bool { self.kind().is_managed() }

    pub fn kube_managed(&self) -> bool { self.kind() == ServiceKind::KubeManaged }

    pub fn oauth_client_id(&self) -> String {
        self.spec
            .oauth_client_id
            .clone()
            .unwrap_or_else(|| format!("service-{}", self.spec.name))
    }

    pub fn oauth_redirect_uri(&self) -> String {
        self.spec
            .oauth_redirect_uri
            .clone()
            .unwrap_or_else(|| format!("{}{}oauth_callback", self.host, self.prefix))
    }

    pub fn oauth_available(&self) -> bool { self.endpoint.is_some() }

    /// Route the proxy serves this service under. Kube services always route
    /// by path; others use the services subdomain when one is configured.
    pub fn proxy_spec(&self) -> Option<String> {
        let endpoint = self.endpoint.as_ref()?;
        if !self.kube_managed() && !self.domain.is_empty() {
            Some(format!("{}{}", self.domain, endpoint.base_url))
        } else {
            Some(endpoint.base_url.clone())
        }
    }

    /// [`proxy_spec`](Self::proxy_spec) in the proxy's wire form (leading `/`).
    pub fn routespec(&self) -> Option<String> {
        self.proxy_spec().map(|spec| if spec.starts_with('/') { spec } else { format!("/{spec}") })
    }

    pub fn with_endpoint_ip(&self, ip: &str) -> Self {
        let mut next = self.clone();
        if let Some(ep) = next.endpoint.as_mut() {
            ep.ip = ip.to_string();
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec { name: name.into(), ..ServiceSpec::default() }
    }

    #[test]
    fn kind_precedence() {
        let mut s = spec("a");
        assert_eq!(ServiceKind::of(&s), ServiceKind::External);
        s.command = vec!["run".into()];
        assert_eq!(ServiceKind::of(&s), ServiceKind::SubprocessManaged);
        s.image = Some("img".into());
        assert_eq!(ServiceKind::of(&s), ServiceKind::KubeManaged);
        assert_eq!(ServiceKind::KubeManaged.to_string(), "kube managed");
    }

    #[test]
    fn oauth_defaults_follow_prefix() {
        let hosts = HostContext::new("/jupyter/", "");
        let rec = ServiceRecord::new(Uuid::new_v4(), spec("dash"), &hosts);
        assert_eq!(rec.prefix, "/jupyter/services/dash/");
        assert_eq!(rec.oauth_client_id(), "service-dash");
        assert_eq!(rec.oauth_redirect_uri(), "/jupyter/services/dash/oauth_callback");
        assert!(!rec.oauth_available());
    }

    #[test]
    fn subdomain_hosting_changes_proxy_spec_for_non_kube() {
        let hosts = HostContext::new("/", "https://hub.example.org:8443");
        assert_eq!(hosts.domain, "services.hub.example.org");
        assert_eq!(hosts.host, "https://services.hub.example.org:8443");

        let mut rec = ServiceRecord::new(Uuid::new_v4(), spec("ext"), &hosts);
        rec.endpoint = EndpointDescriptor::from_url("ext", "http://10.0.0.1:80", &rec.prefix).ok();
        assert_eq!(rec.proxy_spec().as_deref(), Some("services.hub.example.org/services/ext/"));
        assert_eq!(rec.routespec().as_deref(), Some("/services.hub.example.org/services/ext/"));

        rec.spec.image = Some("img".into());
        assert_eq!(rec.proxy_spec().as_deref(), Some("/services/ext/"));
    }
}
