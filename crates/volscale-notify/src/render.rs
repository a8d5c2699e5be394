//! HTML rendering for the scaling report email.

/// One row of the report: a volume that was resized and grown this tick.
#[derive(Debug, Clone)]
pub struct ScaledVolume {
    pub volume_id: String,
    pub mount_point: String,
    pub device: String,
    pub partition: Option<String>,
    pub threshold_percent: f64,
    pub expanded_gib: u64,
    pub previous_gib: u64,
    pub new_gib: u64,
}

/// One row of the report: a scale attempt that did not complete.
#[derive(Debug, Clone)]
pub struct FailedVolume {
    pub volume_id: String,
    pub mount_point: String,
    pub requested_gib: u64,
    /// Why the attempt stopped (`failed`, `timed out`, cap, unsupported
    /// filesystem, ...).
    pub reason: String,
}

const TD: &str = "border: 1px solid #ddd; padding: 8px;";
const TD_NUM: &str = "border: 1px solid #ddd; padding: 8px; text-align: right;";

pub fn subject(instance_id: &str) -> String {
    format!("Volume scaling alert: scaling activity on instance {instance_id}")
}

/// One table row per scaled volume, one per failed attempt, wrapped in a
/// short message.
pub fn body(instance_id: &str, scaled: &[ScaledVolume], failed: &[FailedVolume]) -> String {
    let mut sections = String::new();

    if !scaled.is_empty() {
        let mut rows = String::new();
        for volume in scaled {
            let partition = volume.partition.as_deref().unwrap_or("N/A");
            rows.push_str(&format!(
                "<tr>\
                 <td style=\"{TD}\">{}</td>\
                 <td style=\"{TD}\">{}</td>\
                 <td style=\"{TD}\">{}</td>\
                 <td style=\"{TD}\">{partition}</td>\
                 <td style=\"{TD_NUM}\">{}%</td>\
                 <td style=\"{TD_NUM}\">{}</td>\
                 <td style=\"{TD_NUM}\">{}</td>\
                 <td style=\"{TD_NUM}\">{}</td>\
                 </tr>",
                volume.volume_id,
                volume.mount_point,
                volume.device,
                volume.threshold_percent,
                volume.expanded_gib,
                volume.previous_gib,
                volume.new_gib,
            ));
        }
        sections.push_str(&format!(
            "<p>The following volumes were resized:</p>\
             <table style=\"border-collapse: collapse; width: 100%;\">\
             <thead><tr style=\"background-color: #f2f2f2;\">\
             <th style=\"{TD}\">Volume ID</th>\
             <th style=\"{TD}\">Mount Point</th>\
             <th style=\"{TD}\">Device</th>\
             <th style=\"{TD}\">Partition</th>\
             <th style=\"{TD_NUM}\">Threshold</th>\
             <th style=\"{TD_NUM}\">Expanded by (GiB)</th>\
             <th style=\"{TD_NUM}\">Previous size (GiB)</th>\
             <th style=\"{TD_NUM}\">New size (GiB)</th>\
             </tr></thead>\
             <tbody>{rows}</tbody>\
             </table>"
        ));
    }

    if !failed.is_empty() {
        let mut rows = String::new();
        for volume in failed {
            rows.push_str(&format!(
                "<tr>\
                 <td style=\"{TD}\">{}</td>\
                 <td style=\"{TD}\">{}</td>\
                 <td style=\"{TD_NUM}\">{}</td>\
                 <td style=\"{TD}\">{}</td>\
                 </tr>",
                volume.volume_id, volume.mount_point, volume.requested_gib, volume.reason,
            ));
        }
        sections.push_str(&format!(
            "<p>The following volumes could <b>not</b> be scaled and may need attention:</p>\
             <table style=\"border-collapse: collapse; width: 100%;\">\
             <thead><tr style=\"background-color: #f2f2f2;\">\
             <th style=\"{TD}\">Volume ID</th>\
             <th style=\"{TD}\">Mount Point</th>\
             <th style=\"{TD_NUM}\">Requested size (GiB)</th>\
             <th style=\"{TD}\">Reason</th>\
             </tr></thead>\
             <tbody>{rows}</tbody>\
             </table>"
        ));
    }

    format!(
        "<html><body>\
         <p>Hello,</p>\
         <p>Volume auto-scaling ran on instance <b>{instance_id}</b> with the following details:</p>\
         {sections}\
         <p>Regards,<br>volscale</p>\
         </body></html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> ScaledVolume {
        ScaledVolume {
            volume_id: "vol-0abc".to_string(),
            mount_point: "/data".to_string(),
            device: "/dev/nvme1n1".to_string(),
            partition: Some("/dev/nvme1n1p1".to_string()),
            threshold_percent: 85.0,
            expanded_gib: 10,
            previous_gib: 100,
            new_gib: 110,
        }
    }

    fn failure() -> FailedVolume {
        FailedVolume {
            volume_id: "vol-0bad".to_string(),
            mount_point: "/logs".to_string(),
            requested_gib: 110,
            reason: "unsupported filesystem type \"btrfs\"".to_string(),
        }
    }

    #[test]
    fn subject_names_the_instance() {
        assert!(subject("i-0123").contains("i-0123"));
    }

    #[test]
    fn body_has_a_row_per_scaled_volume() {
        let mut second = volume();
        second.volume_id = "vol-0def".to_string();
        second.partition = None;

        let html = body("i-0123", &[volume(), second], &[]);
        assert!(html.contains("vol-0abc"));
        assert!(html.contains("vol-0def"));
        assert!(html.contains("/dev/nvme1n1p1"));
        // Unpartitioned volumes render a placeholder.
        assert!(html.contains("N/A"));
        assert_eq!(html.matches("<tr>").count(), 2);
    }

    #[test]
    fn body_carries_sizes_and_threshold() {
        let html = body("i-0123", &[volume()], &[]);
        assert!(html.contains("85%"));
        assert!(html.contains(">10<"));
        assert!(html.contains(">100<"));
        assert!(html.contains(">110<"));
    }

    #[test]
    fn failures_render_with_their_reason() {
        let html = body("i-0123", &[], &[failure()]);
        assert!(html.contains("vol-0bad"));
        assert!(html.contains("/logs"));
        assert!(html.contains("unsupported filesystem"));
        assert!(html.contains("not</b> be scaled"));
        // No success table when nothing scaled.
        assert!(!html.contains("were resized"));
    }

    #[test]
    fn mixed_batch_renders_both_sections() {
        let html = body("i-0123", &[volume()], &[failure()]);
        assert!(html.contains("were resized"));
        assert!(html.contains("not</b> be scaled"));
        assert!(html.contains("vol-0abc"));
        assert!(html.contains("vol-0bad"));
    }
}
