// This file is part of stemlabd, an application to drive the signal-processing modules of a StemLab FPGA board over the network.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// stemlabd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// stemlabd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Read-only commands: the module table, single values, setups, signal statistics and scope
//! traces.
//!
//! For [Error Handling] see the main CLI documentation.
//!
//! [Error Handling]: ../index.html#error-handling

use crate::proxies::status_proxy::StatusProxy;
use zbus::Connection;

async fn status_proxy(connection: &Connection) -> Result<StatusProxy<'_>, zbus::Error> {
    StatusProxy::new(connection).await
}

/// Render the module table; free modules show `-` as owner.
pub(crate) fn format_module_table(rows: &[(String, String)]) -> String {
    let mut ret_string = String::from(
        "---- MODULES ----\n\
         | module | owner |\n",
    );
    for (module, owner) in rows {
        let owner = if owner.is_empty() { "-" } else { owner };
        ret_string += format!("| {module} | {owner} |\n").as_str();
    }
    ret_string
}

/// Every module with its owner, or the setup of one module when given.
pub async fn status_handler(module: &Option<String>) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = status_proxy(&connection).await?;
    if let Some(module) = module {
        let setup = proxy.get_setup(module).await?;
        return Ok(pretty_json(&setup));
    }
    let mut rows = Vec::new();
    for module in proxy.list_modules().await?.lines() {
        let owner = proxy.get_owner(module).await?;
        rows.push((module.to_string(), owner));
    }
    Ok(format_module_table(&rows))
}

/// One attribute value, or all attribute names of the module when no attribute is given.
pub async fn get_handler(module: &str, attribute: &Option<String>) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = status_proxy(&connection).await?;
    match attribute {
        Some(attribute) => proxy.get_attribute(module, attribute).await,
        None => proxy.list_attributes(module).await,
    }
}

pub async fn stats_handler(signal: &str, duration_ms: u32) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    let stats = status_proxy(&connection)
        .await?
        .get_signal_stats(signal, duration_ms)
        .await?;
    Ok(pretty_json(&stats))
}

/// The last trace of a scope, with a note when the acquisition is still running.
pub async fn curve_handler(module: &str) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = status_proxy(&connection).await?;
    let ready = proxy.curve_ready(module).await?;
    let table = format_curve(&proxy.get_curve(module).await?)?;
    if ready {
        Ok(table)
    } else {
        Ok(format!("# {module} is still acquiring, showing the previous trace\n{table}"))
    }
}

/// One `time ch1 ch2` line per sample of a JSON trace.
pub(crate) fn format_curve(json: &str) -> Result<String, zbus::Error> {
    let curve: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| zbus::Error::Failure(format!("malformed trace: {e}")))?;
    let column = |name: &str| -> Result<Vec<f64>, zbus::Error> {
        curve[name]
            .as_array()
            .map(|samples| samples.iter().filter_map(serde_json::Value::as_f64).collect())
            .ok_or_else(|| zbus::Error::Failure(format!("trace without {name}")))
    };
    let (times, ch1, ch2) = (column("times")?, column("ch1")?, column("ch2")?);
    Ok(times
        .iter()
        .zip(ch1.iter().zip(&ch2))
        .map(|(t, (a, b))| format!("{t:e} {a} {b}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

pub async fn read_handler(address: u32, length: u32) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    let words = status_proxy(&connection)
        .await?
        .read_registers(address, length)
        .await?;
    Ok(format_words(address, &words))
}

pub(crate) fn format_words(address: u32, words: &[u32]) -> String {
    words
        .iter()
        .enumerate()
        .map(|(i, word)| format!("0x{:08X}: 0x{word:08X}", address + 4 * i as u32))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Indent a JSON reply from the daemon; anything else is shown as received.
fn pretty_json(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}
