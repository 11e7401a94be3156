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

use crate::attributes::Value;
use log::{debug, info};
use std::sync::mpsc::Sender;

/// Something observers of the modules may want to redraw or record.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AttributeChanged {
        module: String,
        attribute: String,
        value: Value,
    },
    OwnershipChanged {
        module: String,
        old: Option<String>,
        new: Option<String>,
    },
    /// The module's transfer function or selection changed.
    PlotChanged { module: String },
    /// A value was corrected on its way into the module.
    ValueCorrected {
        module: String,
        attribute: String,
        requested: Value,
        stored: Value,
    },
}

impl Event {
    pub fn module(&self) -> &str {
        match self {
            Event::AttributeChanged { module, .. }
            | Event::OwnershipChanged { module, .. }
            | Event::PlotChanged { module }
            | Event::ValueCorrected { module, .. } => module,
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: Event);
}

/// Writes every event to the log.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, event: Event) {
        match &event {
            Event::OwnershipChanged { module, old, new } => {
                info!("Owner of {module} changed from {old:?} to {new:?}")
            }
            _ => debug!("{event:?}"),
        }
    }
}

/// Forwards events to a channel. Events are dropped once the receiver is gone.
pub struct ChannelSink {
    sender: Sender<Event>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Event>) -> ChannelSink {
        ChannelSink { sender }
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, event: Event) {
        if self.sender.send(event).is_err() {
            debug!("No receiver left for module events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use std::sync::mpsc::channel;

    #[gtest]
    fn channel_sink_forwards_in_order() {
        let (sender, receiver) = channel();
        let sink = ChannelSink::new(sender);
        sink.notify(Event::PlotChanged {
            module: "iir".into(),
        });
        sink.notify(Event::AttributeChanged {
            module: "pid0".into(),
            attribute: "p".into(),
            value: Value::Float(0.5),
        });
        let modules: Vec<String> = receiver
            .try_iter()
            .map(|event| event.module().to_string())
            .collect();
        assert_that!(modules, eq(&vec!["iir", "pid0"]));
    }

    #[gtest]
    fn channel_sink_survives_a_dropped_receiver() {
        let (sender, receiver) = channel();
        drop(receiver);
        ChannelSink::new(sender).notify(Event::PlotChanged {
            module: "iir".into(),
        });
    }
}
