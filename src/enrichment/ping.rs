use super::group_by;
use crate::models::PingData;
use crate::parsing::FlatRecord;

/// Loss percentage from either `packet_loss` ("0%", "20.0") or `success_rate` ("80")
fn packet_loss(record: &FlatRecord) -> Option<u32> {
    let percent = |value: &str| -> Option<f64> {
        value.trim().trim_end_matches('%').trim().parse::<f64>().ok()
    };

    if let Some(loss) = record.get("packet_loss").and_then(|v| percent(v)) {
        return Some(loss.round().clamp(0.0, 100.0) as u32);
    }
    record
        .get("success_rate")
        .and_then(|v| percent(v))
        .map(|rate| (100.0 - rate).round().clamp(0.0, 100.0) as u32)
}

/// One entry per destination. No lookups: only the destination address is attached.
pub(crate) fn build_ping(records: Vec<FlatRecord>) -> Vec<PingData> {
    group_by(records, "destination")
        .into_iter()
        .map(|(destination, members)| {
            let merged: FlatRecord = members.into_iter().flatten().collect();
            PingData {
                packet_loss: packet_loss(&merged),
                rtt_min: merged.get("rtt_min").cloned(),
                rtt_avg: merged.get("rtt_avg").cloned(),
                rtt_max: merged.get("rtt_max").cloned(),
                packet_count: merged.get("packet_count").cloned(),
                packet_size: merged.get("packet_size").cloned(),
                ip_address: destination,
            }
        })
        .collect()
}
