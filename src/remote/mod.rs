// Kiosk Content Core - resumable content delivery for VR kiosks
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Remote collaborators: the control server and content URL resolution

pub mod client;
pub mod resolver;

pub use client::{
    ControlServer, DeviceSettings, DeviceTelemetry, ExchangeInfo, ExchangeReport, HttpControlServer,
    LoadingInfo, ManagementAction, NoTelemetry, PlaybackState, PlayerReport,
};
pub use resolver::{CloudDiskResolver, PassthroughResolver, UrlResolver};
