use targetrpc_device::{find_serial_port, DevConf};
use targetrpc_transport::{available_ports, PortInfo};

use crate::cmd::PortsArgs;
use crate::exit::{device_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_ports, OutputFormat};

pub fn run(args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    let ports = available_ports().map_err(|err| transport_error("port enumeration failed", err))?;
    let devices = match &args.devconf {
        Some(path) => {
            let conf = DevConf::load(path)
                .map_err(|err| device_error(&format!("failed reading {}", path.display()), err))?;
            label_ports(&ports, &conf)
        }
        None => vec![None; ports.len()],
    };

    print_ports(&ports, &devices, format);
    Ok(SUCCESS)
}

/// Name of the bench device whose application UART each port is.
fn label_ports(ports: &[PortInfo], conf: &DevConf) -> Vec<Option<String>> {
    let mut labels = vec![None; ports.len()];
    for device in &conf.devices {
        let port = match &device.port {
            Some(name) => ports.iter().position(|p| &p.name == name),
            None => find_serial_port(device.snr, &device.family, ports)
                .and_then(|found| ports.iter().position(|p| p.name == found.name)),
        };
        if let Some(index) = port {
            labels[index] = Some(device.name.clone());
        }
    }
    labels
}
