// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use log::warn;

use crate::{
    core::{DmOptions, DM},
    result::LayerResult,
};

/// Suffix concatenated with every test-created device name, so stale
/// devices from a crashed run can be identified and removed.
static TEST_ID: &str = "_layerdev_test_delme";

/// Generate the device name for a test-supplied name.
pub fn test_name(name: &str) -> String {
    format!("{}{}", name, TEST_ID)
}

/// Remove all device-mapper devices a previous test run left behind.
/// Devices may hold references to each other, so keep iterating as long
/// as removals make progress.
pub fn clean_up() -> LayerResult<()> {
    let dm = DM::new()?;

    loop {
        let mut progress = false;
        let mut remain = Vec::new();

        let devices = dm.list_devices()?;
        for (name, _) in devices.iter().filter(|(name, _)| name.contains(TEST_ID)) {
            match dm.device_remove(name, DmOptions::default()) {
                Ok(_) => progress = true,
                Err(_) => remain.push(name.clone()),
            }
        }

        if !progress {
            if !remain.is_empty() {
                warn!("unable to remove test devices {:?}", remain);
            }
            break;
        }
    }

    Ok(())
}
