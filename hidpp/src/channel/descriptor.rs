//! Detects HID++ support from a HID report descriptor.

use hidreport::{Field, Report, ReportDescriptor, Usage, UsageId, UsagePage};

use super::{ChannelError, RawHidChannel};
use crate::protocol::ReportId;

/// hidapi defines this as the maximum EXPECTED size of report descriptors.
/// We will trust this for now, but a workaround may be required if devices do
/// in fact return longer descriptors.
const MAX_REPORT_DESCRIPTOR_LENGTH: usize = 4096;

/// The vendor usage page of HID++ reports on receivers and wired devices.
const HIDPP_USAGE_PAGE: u16 = 0xff00;

/// The vendor usage page of HID++ reports on Bluetooth devices.
const BLE_HIDPP_USAGE_PAGE: u16 = 0xff43;

/// The HID++ report types a transport carries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReportSupport {
    pub short: bool,
    pub long: bool,
    pub very_long: bool,
    pub vlp: bool,
}

impl ReportSupport {
    /// Every report type.
    pub const ALL: Self = Self {
        short: true,
        long: true,
        very_long: true,
        vlp: true,
    };

    /// Whether any HID++ report is supported at all.
    pub fn any(&self) -> bool {
        self.short || self.long || self.very_long || self.vlp
    }

    pub fn supports(&self, report_id: ReportId) -> bool {
        match report_id {
            ReportId::Short => self.short,
            ReportId::Long => self.long,
            ReportId::VeryLong => self.very_long,
            ReportId::Vlp => self.vlp,
        }
    }

    /// Reads the supported report types from a parsed report descriptor.
    pub fn from_descriptor(descriptor: &ReportDescriptor) -> Self {
        Self {
            short: has_vendor_report(descriptor, ReportId::Short, &[0x0001, 0x0701]),
            long: has_vendor_report(descriptor, ReportId::Long, &[0x0002, 0x0702, 0x0202]),
            very_long: has_vendor_report(descriptor, ReportId::VeryLong, &[0x0004, 0x0704, 0x0204]),
            vlp: has_vendor_report(descriptor, ReportId::Vlp, &[0x0004, 0x0704, 0x0204]),
        }
    }
}

fn has_vendor_report(descriptor: &ReportDescriptor, report_id: ReportId, usages: &[u16]) -> bool {
    let Some(range) = descriptor
        .find_input_report(&[u8::from(report_id)])
        .and_then(|report| report.fields().first())
        .and_then(|field| match field {
            Field::Array(arr) => Some(arr.usage_range()),
            _ => None,
        })
    else {
        return false;
    };

    [HIDPP_USAGE_PAGE, BLE_HIDPP_USAGE_PAGE].iter().any(|page| {
        usages.iter().any(|usage| {
            range
                .lookup_usage(&Usage::from_page_and_id(
                    UsagePage::from(*page),
                    UsageId::from(*usage),
                ))
                .is_some()
        })
    })
}

/// Determines the HID++ reports a transport supports, reading its report
/// descriptor unless the transport already knows.
pub async fn probe(raw: &dyn RawHidChannel) -> Result<ReportSupport, ChannelError> {
    if let Some(support) = raw.supports_hidpp_reports() {
        return Ok(support);
    }

    let mut raw_descriptor = vec![0u8; MAX_REPORT_DESCRIPTOR_LENGTH];
    let descriptor_size = raw
        .get_report_descriptor(&mut raw_descriptor)
        .await
        .map_err(|source| ChannelError::Transport { key: None, source })?;

    let descriptor = ReportDescriptor::try_from(&raw_descriptor[..descriptor_size.min(raw_descriptor.len())])
        .map_err(ChannelError::ReportDescriptor)?;

    Ok(ReportSupport::from_descriptor(&descriptor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_by_report_id() {
        let support = ReportSupport {
            short: true,
            long: true,
            ..Default::default()
        };
        assert!(support.any());
        assert!(support.supports(ReportId::Long));
        assert!(!support.supports(ReportId::VeryLong));
        assert!(!ReportSupport::default().any());
    }

    #[test]
    fn receiver_vendor_collections() {
        // The HID++ interface of a Unifying receiver.
        let descriptor = [
            0x06, 0x00, 0xff, 0x09, 0x01, 0xa1, 0x01, 0x85, 0x10, 0x75, 0x08, 0x95, 0x06, 0x15, 0x00, 0x26,
            0xff, 0x00, 0x09, 0x01, 0x81, 0x00, 0x09, 0x01, 0x91, 0x00, 0xc0, 0x06, 0x00, 0xff, 0x09, 0x02,
            0xa1, 0x01, 0x85, 0x11, 0x75, 0x08, 0x95, 0x13, 0x15, 0x00, 0x26, 0xff, 0x00, 0x09, 0x02, 0x81,
            0x00, 0x09, 0x02, 0x91, 0x00, 0xc0,
        ];
        let descriptor = ReportDescriptor::try_from(&descriptor[..]).unwrap();
        assert_eq!(ReportSupport::from_descriptor(&descriptor), ReportSupport {
            short: true,
            long: true,
            ..Default::default()
        });
    }

    #[test]
    fn descriptors_without_vendor_reports_support_nothing() {
        // A boot mouse: one input report without report ID.
        let descriptor = [
            0x05, 0x01, 0x09, 0x02, 0xa1, 0x01, 0x09, 0x01, 0xa1, 0x00, 0x05, 0x09, 0x19, 0x01, 0x29, 0x03,
            0x15, 0x00, 0x25, 0x01, 0x95, 0x03, 0x75, 0x01, 0x81, 0x02, 0x95, 0x01, 0x75, 0x05, 0x81, 0x03,
            0x05, 0x01, 0x09, 0x30, 0x09, 0x31, 0x15, 0x81, 0x25, 0x7f, 0x75, 0x08, 0x95, 0x02, 0x81, 0x06,
            0xc0, 0xc0,
        ];
        let descriptor = ReportDescriptor::try_from(&descriptor[..]).unwrap();
        assert_eq!(ReportSupport::from_descriptor(&descriptor), ReportSupport::default());
    }
}
