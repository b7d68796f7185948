use std::time::Duration;

/// Connection parameters for the directory behind the domain controller.
#[derive(Clone, Debug)]
pub struct DirectorySettings {
    /// Host name or IP of the domain controller.
    pub dc_host: String,
    pub use_ldaps: bool,
    /// Bind account, e.g. `Administrator`.
    pub bind_user: String,
    pub bind_password: String,
    /// AD domain, e.g. `eixe.example.org`.
    pub domain: String,
    pub conn_timeout: Duration,
}

impl DirectorySettings {
    pub fn new(
        dc_host: impl Into<String>,
        domain: impl Into<String>,
        bind_user: impl Into<String>,
        bind_password: impl Into<String>,
    ) -> Self {
        DirectorySettings {
            dc_host: dc_host.into(),
            use_ldaps: false,
            bind_user: bind_user.into(),
            bind_password: bind_password.into(),
            domain: domain.into(),
            conn_timeout: Duration::from_secs(30),
        }
    }

    pub fn url(&self) -> String {
        if self.use_ldaps {
            format!("ldaps://{}", self.dc_host)
        } else {
            format!("ldap://{}", self.dc_host)
        }
    }

    /// `eixe.example.org` -> `DC=eixe,DC=example,DC=org`
    pub fn search_base(&self) -> String {
        self.domain
            .split('.')
            .map(|part| format!("DC={}", part))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// DNS-specific policy: the default forward zone, how reverse zones are
/// recognized, and which zone/node names are hidden and write-protected.
#[derive(Clone, Debug)]
pub struct DnsSettings {
    /// Forward zone that unqualified host names fall back to.
    pub default_zone: String,
    /// Case-insensitive suffixes identifying reverse zones.
    pub reverse_zone_suffixes: Vec<String>,
    /// Names matching any of these patterns are hidden from reads and
    /// rejected for mutations. Applied to full zone names and node labels.
    pub excluded_names: Vec<String>,
    /// DNS server argument handed to `samba-tool dns`.
    pub server: String,
}

impl DnsSettings {
    pub fn new(default_zone: impl Into<String>, server: impl Into<String>) -> Self {
        DnsSettings {
            default_zone: default_zone.into(),
            reverse_zone_suffixes: vec![".in-addr.arpa".to_string(), ".ip6.arpa".to_string()],
            excluded_names: default_excluded_names(),
            server: server.into(),
        }
    }
}

/// Zone root (`@`), service records (`_kerberos` etc.), the AD stub zones
/// `RootDNSServers` and `..TrustAnchors`.
pub fn default_excluded_names() -> Vec<String> {
    vec![
        "^@$".to_string(),
        "^_".to_string(),
        "^RootDNSServers$".to_string(),
        "^\\.\\.".to_string(),
    ]
}

/// Settings for the privileged external tool layer (`kinit` + `samba-tool`).
#[derive(Clone, Debug)]
pub struct ToolSettings {
    pub samba_tool: String,
    pub kinit: String,
    /// Kerberos principal used for privileged operations.
    pub principal: String,
    pub password: String,
    /// How long an acquired ticket is trusted before `kinit` runs again.
    pub ticket_lifetime: Duration,
}

impl ToolSettings {
    pub fn new(principal: impl Into<String>, password: impl Into<String>) -> Self {
        ToolSettings {
            samba_tool: "samba-tool".to_string(),
            kinit: "kinit".to_string(),
            principal: principal.into(),
            password: password.into(),
            ticket_lifetime: Duration::from_secs(8 * 60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub directory: DirectorySettings,
    pub dns: DnsSettings,
    pub tool: ToolSettings,
    /// Interval of the background DHCP lease refresh.
    pub lease_refresh: Duration,
}

impl Settings {
    pub fn new(directory: DirectorySettings, dns: DnsSettings, tool: ToolSettings) -> Self {
        Settings {
            directory,
            dns,
            tool,
            lease_refresh: Duration::from_secs(30),
        }
    }
}
