//! Runtime variables reachable through the `CHECK` and `SET` opcodes.
//!
//! The controller addresses variables by name. Each name maps to a getter
//! and an optional setter in a static table, so the dispatcher never needs
//! to know what a variable means.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::registry::args::truncate_to;

/// Longest module name kept, in bytes.
pub const MAX_MODULE_NAME_LEN: usize = 32;

/// Highest GPIO number accepted for pin variables.
const MAX_PIN: i8 = 39;

/// WiFi operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum WifiMode {
    #[serde(rename = "STA")]
    Station,
    #[serde(rename = "AP")]
    AccessPoint,
    #[serde(rename = "APSTA")]
    StationAccessPoint,
}

impl WifiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WifiMode::Station => "STA",
            WifiMode::AccessPoint => "AP",
            WifiMode::StationAccessPoint => "APSTA",
        }
    }

    /// Accepts the mode names or their numeric codes 1..=3.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STA" | "1" => Some(WifiMode::Station),
            "AP" | "2" => Some(WifiMode::AccessPoint),
            "APSTA" | "3" => Some(WifiMode::StationAccessPoint),
            _ => None,
        }
    }
}

/// Hardware address of a WiFi interface.
///
/// ```
/// # use wxbridge::settings::MacAddr;
/// let mac: MacAddr = "24:0A:c4:00:01:02".parse().unwrap();
/// assert_eq!(mac.to_string(), "24:0a:c4:00:01:02");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("MAC address needs six octets: {}", s))?;
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                anyhow::bail!("bad MAC octet {:?} in {}", part, s);
            }
            *octet = u8::from_str_radix(part, 16)?;
        }
        if parts.next().is_some() {
            anyhow::bail!("MAC address has more than six octets: {}", s);
        }
        Ok(MacAddr(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = anyhow::Error;

    fn try_from(value: String) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

/// Current values of every runtime variable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    pub module_name: String,
    pub wifi_mode: WifiMode,
    /// SSID from the last `JOIN`; never read from configuration.
    #[serde(skip)]
    pub wifi_ssid: String,
    /// Emit a poll-notice as soon as an HTTP request is parked.
    pub events: bool,
    pub enable: bool,
    pub loader: bool,
    pub loader_baud_rate: u32,
    pub baud_rate: u32,
    pub dbg_baud_rate: u32,
    pub dbg_enable: bool,
    pub reset_pin: i8,
    pub conn_led_pin: i8,
    /// Frame start byte reported to the controller. Framing itself always
    /// uses `0xFE`.
    pub start_char: u8,
    pub station_ipaddr: Ipv4Addr,
    pub station_macaddr: MacAddr,
    pub softap_ipaddr: Ipv4Addr,
    pub softap_macaddr: MacAddr,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            module_name: "wxbridge".to_string(),
            wifi_mode: WifiMode::Station,
            wifi_ssid: String::new(),
            events: false,
            enable: false,
            loader: false,
            loader_baud_rate: 115_200,
            baud_rate: 115_200,
            dbg_baud_rate: 115_200,
            dbg_enable: false,
            reset_pin: 12,
            conn_led_pin: 16,
            start_char: 0xFE,
            station_ipaddr: Ipv4Addr::UNSPECIFIED,
            station_macaddr: MacAddr::default(),
            softap_ipaddr: Ipv4Addr::UNSPECIFIED,
            softap_macaddr: MacAddr::default(),
        }
    }
}

/// Settings shared between the serial task and HTTP workers.
pub type SharedSettings = Arc<RwLock<Settings>>;

pub fn shared(settings: Settings) -> SharedSettings {
    Arc::new(RwLock::new(settings))
}

/// Why a variable access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableError {
    /// No variable has this name.
    Unknown,
    /// The variable has no setter.
    ReadOnly,
    /// The setter did not accept the value.
    Rejected,
}

type Getter = fn(&Settings) -> String;
type Setter = fn(&mut Settings, &str) -> Result<(), VariableError>;

struct Variable {
    name: &'static str,
    get: Getter,
    set: Option<Setter>,
}

static VARIABLES: &[Variable] = &[
    Variable { name: "version", get: get_version, set: None },
    Variable { name: "module-name", get: get_module_name, set: Some(set_module_name) },
    Variable { name: "wifi-mode", get: get_wifi_mode, set: Some(set_wifi_mode) },
    Variable { name: "wifi-ssid", get: get_wifi_ssid, set: None },
    Variable { name: "station-ipaddr", get: get_station_ipaddr, set: Some(set_station_ipaddr) },
    Variable { name: "station-macaddr", get: get_station_macaddr, set: None },
    Variable { name: "softap-ipaddr", get: get_softap_ipaddr, set: Some(set_softap_ipaddr) },
    Variable { name: "softap-macaddr", get: get_softap_macaddr, set: None },
    Variable { name: "cmd-start-char", get: get_start_char, set: Some(set_start_char) },
    Variable { name: "cmd-events", get: get_events, set: Some(set_events) },
    Variable { name: "cmd-enable", get: get_enable, set: Some(set_enable) },
    Variable { name: "cmd-loader", get: get_loader, set: Some(set_loader) },
    Variable { name: "loader-baud-rate", get: get_loader_baud_rate, set: Some(set_loader_baud_rate) },
    Variable { name: "baud-rate", get: get_baud_rate, set: Some(set_baud_rate) },
    Variable { name: "dbg-baud-rate", get: get_dbg_baud_rate, set: Some(set_dbg_baud_rate) },
    Variable { name: "dbg-enable", get: get_dbg_enable, set: Some(set_dbg_enable) },
    Variable { name: "reset-pin", get: get_reset_pin, set: Some(set_reset_pin) },
    Variable { name: "connect-led-pin", get: get_conn_led_pin, set: Some(set_conn_led_pin) },
];

fn lookup(name: &str) -> Result<&'static Variable, VariableError> {
    VARIABLES
        .iter()
        .find(|v| v.name == name)
        .ok_or(VariableError::Unknown)
}

/// Reads a variable by name.
pub fn get_variable(settings: &Settings, name: &str) -> Result<String, VariableError> {
    let var = lookup(name)?;
    Ok((var.get)(settings))
}

/// Writes a variable by name.
pub fn set_variable(settings: &mut Settings, name: &str, value: &str) -> Result<(), VariableError> {
    let var = lookup(name)?;
    let set = var.set.ok_or(VariableError::ReadOnly)?;
    set(settings, value)?;
    tracing::info!(variable = name, value, "Variable updated");
    Ok(())
}

/// Names of every variable, in table order.
pub fn variable_names() -> impl Iterator<Item = &'static str> {
    VARIABLES.iter().map(|v| v.name)
}

fn parse_flag(value: &str) -> Result<bool, VariableError> {
    value
        .trim()
        .parse::<i64>()
        .map(|v| v != 0)
        .map_err(|_| VariableError::Rejected)
}

fn parse_baud(value: &str) -> Result<u32, VariableError> {
    match value.trim().parse::<u32>() {
        Ok(rate) if rate > 0 => Ok(rate),
        _ => Err(VariableError::Rejected),
    }
}

fn parse_pin(value: &str) -> Result<i8, VariableError> {
    match value.trim().parse::<i8>() {
        Ok(pin) if (-1..=MAX_PIN).contains(&pin) => Ok(pin),
        _ => Err(VariableError::Rejected),
    }
}

/// Accepts `ip[-netmask[-gateway[-dns1[-dns2]]]]` and returns the address.
/// The trailing fields are checked but not kept; the host owns its routing.
fn parse_static_ip(value: &str) -> Result<Ipv4Addr, VariableError> {
    let mut fields = value.trim().split('-');
    let ip = fields
        .next()
        .and_then(|ip| ip.parse::<Ipv4Addr>().ok())
        .ok_or(VariableError::Rejected)?;

    let mut extra = 0;
    for field in fields {
        extra += 1;
        if extra > 4 || field.parse::<Ipv4Addr>().is_err() {
            return Err(VariableError::Rejected);
        }
    }
    Ok(ip)
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn get_version(_: &Settings) -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn get_module_name(s: &Settings) -> String {
    s.module_name.clone()
}

fn set_module_name(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.module_name = truncate_to(value, MAX_MODULE_NAME_LEN).to_string();
    Ok(())
}

fn get_wifi_mode(s: &Settings) -> String {
    s.wifi_mode.as_str().to_string()
}

fn set_wifi_mode(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.wifi_mode = WifiMode::parse(value.trim()).ok_or(VariableError::Rejected)?;
    Ok(())
}

fn get_wifi_ssid(s: &Settings) -> String {
    s.wifi_ssid.clone()
}

fn get_station_ipaddr(s: &Settings) -> String {
    s.station_ipaddr.to_string()
}

fn set_station_ipaddr(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.station_ipaddr = parse_static_ip(value)?;
    Ok(())
}

fn get_station_macaddr(s: &Settings) -> String {
    s.station_macaddr.to_string()
}

fn get_softap_ipaddr(s: &Settings) -> String {
    s.softap_ipaddr.to_string()
}

fn set_softap_ipaddr(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.softap_ipaddr = parse_static_ip(value)?;
    Ok(())
}

fn get_softap_macaddr(s: &Settings) -> String {
    s.softap_macaddr.to_string()
}

fn get_start_char(s: &Settings) -> String {
    s.start_char.to_string()
}

fn set_start_char(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.start_char = value.trim().parse::<u8>().map_err(|_| VariableError::Rejected)?;
    Ok(())
}

fn get_events(s: &Settings) -> String {
    flag(s.events)
}

fn set_events(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.events = parse_flag(value)?;
    Ok(())
}

fn get_enable(s: &Settings) -> String {
    flag(s.enable)
}

fn set_enable(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.enable = parse_flag(value)?;
    Ok(())
}

fn get_loader(s: &Settings) -> String {
    flag(s.loader)
}

fn set_loader(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.loader = parse_flag(value)?;
    Ok(())
}

fn get_loader_baud_rate(s: &Settings) -> String {
    s.loader_baud_rate.to_string()
}

fn set_loader_baud_rate(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.loader_baud_rate = parse_baud(value)?;
    Ok(())
}

fn get_baud_rate(s: &Settings) -> String {
    s.baud_rate.to_string()
}

fn set_baud_rate(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.baud_rate = parse_baud(value)?;
    Ok(())
}

fn get_dbg_baud_rate(s: &Settings) -> String {
    s.dbg_baud_rate.to_string()
}

fn set_dbg_baud_rate(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.dbg_baud_rate = parse_baud(value)?;
    Ok(())
}

fn get_dbg_enable(s: &Settings) -> String {
    flag(s.dbg_enable)
}

fn set_dbg_enable(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.dbg_enable = parse_flag(value)?;
    Ok(())
}

fn get_reset_pin(s: &Settings) -> String {
    s.reset_pin.to_string()
}

fn set_reset_pin(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.reset_pin = parse_pin(value)?;
    Ok(())
}

fn get_conn_led_pin(s: &Settings) -> String {
    s.conn_led_pin.to_string()
}

fn set_conn_led_pin(s: &mut Settings, value: &str) -> Result<(), VariableError> {
    s.conn_led_pin = parse_pin(value)?;
    Ok(())
}
