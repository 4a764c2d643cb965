use std::collections::BTreeSet;

use chrono::{DateTime, Local, Utc};
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use itertools::Itertools;

use crate::checker::Run;
use crate::config::DcsConfig;
use crate::ident::{DeviceKey, MacAddress};

const STYLE: &str = "table {border-collapse: collapse; width: 100%} \
    table, th, td { border: 1px solid black; } \
    th, td { padding: 5px; text-align: left; } \
    caption { font-weight: bold; text-align: left; } \
    tr:nth-child(even) {background-color: #f2f2f2} \
    tr:hover {background-color: #cccccc} \
    th { background-color: #808080; color: white;}";

const NOT_FOUND: &str = "Not found in the database";

/// Render the report for one check as a standalone HTML document.
pub fn render(run: &Run, dcs: &DcsConfig, show_ignored: bool) -> String {
    let mut html = format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>{}</style></head><body>",
        STYLE
    );

    let elapsed = (run.now - run.last_run).num_seconds() as f64 / 60.0;
    html.push_str(&format!(
        "<p><b>Checks run at: {}<br>Last checks run at: {} ({:.1} minutes ago)</b></p>",
        local(run.now),
        local(run.last_run),
        elapsed
    ));

    let idcs = &run.controllers;
    for (caption, macs, ignored) in [
        ("*** New Offline IDCs found ***", &idcs.newly_offline, false),
        ("Existing Offline IDCs since last check", &idcs.still_offline, false),
        ("IDCs now appear to be back online", &idcs.recovered, false),
        ("The following IDCs are being ignored", &idcs.ignored, true),
    ] {
        let shown = if ignored { show_ignored } else { !macs.is_empty() };
        if shown {
            html.push_str(&idc_table(caption, macs, run, dcs));
        }
    }

    let devices = &run.devices;
    for (caption, keys, ignored) in [
        ("*** New Offline Devices found ***", &devices.newly_offline, false),
        ("Existing Offline Devices since last check", &devices.still_offline, false),
        ("Devices now appear to be back online", &devices.recovered, false),
        ("The following Devices are being ignored", &devices.ignored, true),
    ] {
        let shown = if ignored { show_ignored } else { !keys.is_empty() };
        if shown {
            html.push_str(&device_table(caption, keys, run, dcs));
        }
    }

    html.push_str("</body></html>");
    html
}

fn local(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn table(caption: &str, headings: &[&str], rows: Vec<String>) -> String {
    let mut html = format!("<br><table><caption>{}</caption><tr>", text(caption));
    for heading in headings {
        html.push_str(&format!("<th>{}</th>", text(heading)));
    }
    html.push_str("</tr>");

    if rows.is_empty() {
        html.push_str(&format!(
            "<tr><td colspan=\"{}\" style=\"text-align: center\">-- None --</td></tr>",
            headings.len()
        ));
    }
    for row in rows {
        html.push_str(&row);
    }

    html.push_str("</table><br>");
    html
}

fn idc_link(dcs: &DcsConfig, mac: MacAddress, label: &str) -> String {
    format!(
        "<a href=\"{}\">{}</a>",
        attr(&dcs.idc_url(mac)),
        text(label)
    )
}

fn idc_table(caption: &str, macs: &BTreeSet<MacAddress>, run: &Run, dcs: &DcsConfig) -> String {
    const HEADINGS: [&str; 4] = ["MAC", "Name", "IP Address", "Last Online"];

    // Unknown IDCs first, then never connected, then longest offline
    let rows = macs
        .iter()
        .sorted_by_key(|mac| (run.snapshot.controller(mac).map(|c| c.last_connected), **mac))
        .map(|mac| match run.snapshot.controller(mac) {
            Some(idc) => {
                let mac_cell = match &dcs.netdiag_url {
                    Some(netdiag) => format!(
                        "<a href=\"{}{}\">{}</a>",
                        attr(netdiag),
                        mac.dotted(),
                        mac
                    ),
                    None => mac.to_string(),
                };
                format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    mac_cell,
                    idc_link(dcs, *mac, &idc.name),
                    text(idc.ip_address.as_deref().unwrap_or("")),
                    idc.last_connected
                        .map(local)
                        .unwrap_or_else(|| "Never".to_owned())
                )
            }
            None => format!(
                "<tr><td>{}</td><td colspan=\"{}\" style=\"text-align: center\">{}</td></tr>",
                mac,
                HEADINGS.len() - 1,
                NOT_FOUND
            ),
        })
        .collect();

    table(caption, &HEADINGS, rows)
}

fn device_table(caption: &str, keys: &BTreeSet<DeviceKey>, run: &Run, dcs: &DcsConfig) -> String {
    const HEADINGS: [&str; 9] = [
        "Database ID",
        "Device",
        "IDC MAC",
        "IDC Name",
        "Type",
        "Description",
        "Serial Number",
        "Modbus ID",
        "Status Since",
    ];

    let rows = keys
        .iter()
        .map(|key| match run.snapshot.device(key) {
            Some(dev) => {
                let idc_name = match run.snapshot.controller(&key.idc) {
                    Some(idc) => idc_link(dcs, key.idc, &idc.name),
                    None => String::new(),
                };
                format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    dev.id,
                    dev.label(),
                    key.idc,
                    idc_name,
                    dev.kind.name(),
                    text(dev.description.as_deref().unwrap_or("")),
                    text(dev.serial_number.as_deref().unwrap_or("")),
                    key.slave,
                    dev.status_changed.map(local).unwrap_or_default()
                )
            }
            None => format!(
                "<tr><td></td><td>{}</td><td>{}</td><td colspan=\"{}\" style=\"text-align: center\">{}</td></tr>",
                run.snapshot.device_label(key),
                key.idc,
                HEADINGS.len() - 3,
                NOT_FOUND
            ),
        })
        .collect();

    table(caption, &HEADINGS, rows)
}
