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


//! File management and storage
//!
//! This module handles file operations, the on-disk naming convention and
//! storage selection/cleanup for the content directory.

pub mod manager;
pub mod paths;
pub mod storage;

// Re-export commonly used types
pub use manager::FileManager;
pub use paths::PathBuilder;
pub use storage::{SpaceProbe, StorageGovernor, SysinfoSpaceProbe};
