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

//! Commands that change the board: attribute values, setups, ownership and raw registers.
//!
//! Values are passed to the daemon as JSON, so `0.5`, `true`, `"in1"` (quoted for the shell)
//! and `[-1000.0, 2000.0]` are all accepted. A bare word such as `in1` is sent as a JSON string.

use crate::proxies::control_proxy::ControlProxy;
use zbus::Connection;

async fn control_proxy(connection: &Connection) -> Result<ControlProxy<'_>, zbus::Error> {
    ControlProxy::new(connection).await
}

/// Quote a bare word so the daemon receives valid JSON.
pub(crate) fn as_json(value: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(_) => value.to_string(),
        Err(_) => serde_json::Value::String(value.to_string()).to_string(),
    }
}

pub async fn set_handler(module: &str, attribute: &str, value: &str) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    control_proxy(&connection)
        .await?
        .set_attribute(module, attribute, &as_json(value))
        .await
}

/// Apply `name=value` pairs as one setup.
pub async fn setup_handler(module: &str, assignments: &[String]) -> Result<String, zbus::Error> {
    let mut object = serde_json::Map::new();
    for assignment in assignments {
        let (name, value) = assignment.split_once('=').ok_or_else(|| {
            zbus::Error::Failure(format!("'{assignment}' is not of the form name=value"))
        })?;
        let value = serde_json::from_str(&as_json(value))
            .map_err(|e| zbus::Error::Failure(format!("'{value}' is not a value: {e}")))?;
        object.insert(name.to_string(), value);
    }
    let connection = Connection::system().await?;
    control_proxy(&connection)
        .await?
        .setup(module, &serde_json::Value::Object(object).to_string())
        .await
}

pub async fn acquire_handler(module: &str, owner: &str) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    control_proxy(&connection).await?.acquire(module, owner).await
}

pub async fn release_handler(module: &str) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    control_proxy(&connection).await?.release(module).await
}

pub async fn write_handler(address: u32, values: Vec<u32>) -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    control_proxy(&connection)
        .await?
        .write_registers(address, values)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::number("0.5", "0.5")]
    #[case::boolean("true", "true")]
    #[case::list("[1.0,2.0]", "[1.0,2.0]")]
    #[case::quoted(r#""in1""#, r#""in1""#)]
    #[case::bare_word("in1", r#""in1""#)]
    fn values_are_sent_as_json(#[case] value: &str, #[case] expected: &str) {
        assert_eq!(as_json(value), expected);
    }
}
