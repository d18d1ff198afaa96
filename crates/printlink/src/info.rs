//! `SEND_INFO` payload builder.

use serde_json::{Map, Value, json};

use crate::printer::Printer;

/// SDK version reported in `SEND_INFO` and the `SDK-Version` header.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Assembles the info payload: identity, versions, network, storages and
/// the file tree.
pub(crate) fn build_info(printer: &Printer) -> Map<String, Value> {
    let mut info = Map::new();
    info.insert("serial".into(), Value::from(printer.serial_number()));
    info.insert("fingerprint".into(), Value::from(printer.fingerprint()));
    info.insert(
        "printer_type".into(),
        Value::from(printer.printer_type().as_str()),
    );
    info.insert("sdk_version".into(), Value::from(SDK_VERSION));
    if let Some(firmware) = printer.firmware_version() {
        info.insert("firmware".into(), Value::from(firmware));
    }
    info.insert("state".into(), Value::from(printer.state().as_str()));

    let network = printer.network();
    let mut net = Map::new();
    if let Some(hostname) = &network.hostname {
        net.insert("hostname".into(), Value::from(hostname.as_str()));
    }
    if let Some(ipv4) = &network.ipv4 {
        net.insert("ipv4".into(), Value::from(ipv4.as_str()));
    }
    if let Some(mac) = &network.mac {
        net.insert("mac".into(), Value::from(mac.as_str()));
    }
    if !net.is_empty() {
        info.insert("network_info".into(), Value::Object(net));
    }

    // Connectivity health: the full flag set plus the root-cause problem,
    // so the service can render "token rejected" instead of "API down".
    let conditions = printer.conditions();
    let flags: Vec<Value> = conditions.snapshot().into_iter().map(|c| json!(c)).collect();
    info.insert("conditions".into(), Value::from(flags));
    if let Some(problem) = conditions.worst() {
        info.insert("problem".into(), json!(problem));
    }

    if let Some(fs) = printer.filesystem() {
        let storages: Vec<Value> = fs
            .storage_summaries()
            .into_iter()
            .map(|s| json!(s))
            .collect();
        info.insert("storages".into(), Value::from(storages));
        // Current servers consume the flat index; the nested shape rides
        // along for old ones.
        let files: Vec<Value> = fs.flat_info().into_iter().map(|e| json!(e)).collect();
        info.insert("files".into(), Value::from(files));
        info.insert("files_legacy".into(), fs.legacy_info());
    }
    info
}
