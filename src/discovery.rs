use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::ScopeConfig;
use crate::scope::Oscilloscope;
use crate::transport::{InstrumentTransport, StreamTransport, TransportError};

/// Prefix selecting the first USB instrument.
pub const DEFAULT_PREFIX: &str = "USB";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// A `/dev/usbtmcN` character device
    UsbTmc { device: PathBuf },
    Serial { port: String },
    /// Raw SCPI over TCP
    Socket { host: String, port: u16 },
}

/// An instrument that can be opened, under a VISA-style name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentResource {
    pub name: String,
    pub kind: ResourceKind,
}

impl InstrumentResource {
    /// `vendor` and `product` are the hex ids as udev reports them.
    pub fn usbtmc(vendor: &str, product: &str, serial: &str, device: PathBuf) -> Self {
        Self {
            name: format!(
                "USB0::0x{}::0x{}::{}::INSTR",
                vendor.to_ascii_uppercase(),
                product.to_ascii_uppercase(),
                serial
            ),
            kind: ResourceKind::UsbTmc { device },
        }
    }

    pub fn serial(port: &str) -> Self {
        Self {
            name: format!("ASRL{}::INSTR", port),
            kind: ResourceKind::Serial {
                port: port.to_string(),
            },
        }
    }

    pub fn socket(host: &str, port: u16) -> Self {
        Self {
            name: format!("TCPIP0::{}::{}::SOCKET", host, port),
            kind: ResourceKind::Socket {
                host: host.to_string(),
                port,
            },
        }
    }
}

impl fmt::Display for InstrumentResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for InstrumentResource {
    type Err = DiscoveryError;

    /// Parse a serial or socket resource name. USB names only identify a
    /// device through enumeration, so they are not accepted here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DiscoveryError::InvalidResource(s.to_string());
        if let Some(port) = s.strip_prefix("ASRL").and_then(|r| r.strip_suffix("::INSTR")) {
            if port.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::serial(port));
        }
        match s.split("::").collect::<Vec<_>>().as_slice() {
            [board, host, port, "SOCKET"] if board.starts_with("TCPIP") && !host.is_empty() => {
                let port = port.parse().map_err(|_| invalid())?;
                Ok(Self::socket(host, port))
            }
            _ => Err(invalid()),
        }
    }
}

fn describe(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "none".to_string()
    } else {
        candidates.join(", ")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("No instrument matches '{prefix}' (available: {})", describe(.candidates))]
    NoInstrument {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("Several instruments match '{prefix}': {}", describe(.candidates))]
    AmbiguousInstrument {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid resource name '{0}'")]
    InvalidResource(String),
}

impl DiscoveryError {
    /// Names the caller could have meant, for error reporting.
    pub fn candidates(&self) -> &[String] {
        match self {
            Self::NoInstrument { candidates, .. } | Self::AmbiguousInstrument { candidates, .. } => {
                candidates
            }
            _ => &[],
        }
    }
}

pub struct ScopeConnector;

impl ScopeConnector {
    /// Every instrument reachable right now.
    pub fn list_resources(config: &ScopeConfig) -> Result<Vec<InstrumentResource>, DiscoveryError> {
        let mut resources = Self::usbtmc_devices()?;
        resources.extend(Self::serial_ports());
        resources.extend(Self::socket_resources(config));
        log::debug!("Found {} instrument resources", resources.len());
        Ok(resources)
    }

    #[cfg(target_os = "linux")]
    fn usbtmc_devices() -> Result<Vec<InstrumentResource>, DiscoveryError> {
        let mut enumerator = udev::Enumerator::new()?;
        enumerator.match_subsystem("usbmisc")?;

        let mut devices = Vec::new();
        for device in enumerator.scan_devices()? {
            if !device.sysname().to_string_lossy().starts_with("usbtmc") {
                continue;
            }
            let Some(node) = device.devnode() else {
                continue;
            };
            let Some(usb) = device.parent_with_subsystem_devtype("usb", "usb_device")? else {
                continue;
            };
            let attribute = |name: &str| {
                usb.attribute_value(name)
                    .map(|value| value.to_string_lossy().trim().to_string())
            };
            if let (Some(vendor), Some(product)) = (attribute("idVendor"), attribute("idProduct")) {
                let serial = attribute("serial").unwrap_or_default();
                devices.push(InstrumentResource::usbtmc(
                    &vendor,
                    &product,
                    &serial,
                    node.to_path_buf(),
                ));
            }
        }
        Ok(devices)
    }

    #[cfg(not(target_os = "linux"))]
    fn usbtmc_devices() -> Result<Vec<InstrumentResource>, DiscoveryError> {
        Ok(Vec::new())
    }

    fn serial_ports() -> Vec<InstrumentResource> {
        match serialport::available_ports() {
            Ok(ports) => ports
                .iter()
                .map(|p| InstrumentResource::serial(&p.port_name))
                .collect(),
            Err(e) => {
                log::warn!("Cannot enumerate serial ports: {}", e);
                Vec::new()
            }
        }
    }

    fn socket_resources(config: &ScopeConfig) -> Vec<InstrumentResource> {
        config
            .socket_hosts
            .iter()
            .map(|host| InstrumentResource::socket(host, config.socket_port))
            .collect()
    }

    /// Pick the single resource whose name starts with `prefix`.
    pub fn select(
        resources: &[InstrumentResource],
        prefix: &str,
    ) -> Result<InstrumentResource, DiscoveryError> {
        let matches: Vec<_> = resources
            .iter()
            .filter(|r| r.name.starts_with(prefix))
            .collect();
        match matches.as_slice() {
            [only] => Ok((*only).clone()),
            [] => Err(DiscoveryError::NoInstrument {
                prefix: prefix.to_string(),
                candidates: resources.iter().map(|r| r.name.clone()).collect(),
            }),
            _ => Err(DiscoveryError::AmbiguousInstrument {
                prefix: prefix.to_string(),
                candidates: matches.iter().map(|r| r.name.clone()).collect(),
            }),
        }
    }

    pub fn open(
        resource: &InstrumentResource,
        config: &ScopeConfig,
    ) -> Result<Box<dyn InstrumentTransport>, DiscoveryError> {
        log::debug!("Opening {}", resource);
        let transport: Box<dyn InstrumentTransport> = match &resource.kind {
            ResourceKind::UsbTmc { device } => Box::new(StreamTransport::open_usbtmc(device, config)?),
            ResourceKind::Serial { port } => Box::new(StreamTransport::open_serial(port, config)?),
            ResourceKind::Socket { host, port } => {
                Box::new(StreamTransport::open_socket((host.as_str(), *port), config)?)
            }
        };
        Ok(transport)
    }

    /// Connect to the one instrument whose name starts with `prefix`.
    pub fn connect(
        prefix: &str,
        config: &ScopeConfig,
    ) -> Result<Oscilloscope<Box<dyn InstrumentTransport>>, DiscoveryError> {
        let resources = Self::list_resources(config)?;
        let resource = Self::select(&resources, prefix)?;
        log::info!("Connecting to {}", resource);
        let transport = Self::open(&resource, config)?;
        Ok(Oscilloscope::new(transport, config.clone()))
    }

    /// Connect to an explicitly named serial or socket resource.
    pub fn connect_resource(
        name: &str,
        config: &ScopeConfig,
    ) -> Result<Oscilloscope<Box<dyn InstrumentTransport>>, DiscoveryError> {
        let resource: InstrumentResource = name.parse()?;
        let transport = Self::open(&resource, config)?;
        Ok(Oscilloscope::new(transport, config.clone()))
    }
}
