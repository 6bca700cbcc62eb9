//! Campaign status transitions driven by delivery outcome

use super::aggregator::DeliveryStatus;
use mailcast_common::types::CampaignStatus;

/// Terminal campaign status for a finished delivery
///
/// `sent` when nothing failed, `failed` when nothing was sent, otherwise
/// `partially_sent`.
pub fn final_campaign_status(status: &DeliveryStatus) -> CampaignStatus {
    if status.failed == 0 {
        CampaignStatus::Sent
    } else if status.sent == 0 {
        CampaignStatus::Failed
    } else {
        CampaignStatus::PartiallySent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn status(sent: u64, failed: u64) -> DeliveryStatus {
        let mut status = DeliveryStatus::new(Uuid::new_v4(), sent + failed);
        status.record_sent(sent);
        let ids: Vec<Uuid> = (0..failed).map(|_| Uuid::new_v4()).collect();
        status.record_failed(&ids, "err");
        status
    }

    #[test]
    fn test_final_status_mapping() {
        assert_eq!(final_campaign_status(&status(10, 0)), CampaignStatus::Sent);
        assert_eq!(final_campaign_status(&status(0, 10)), CampaignStatus::Failed);
        assert_eq!(
            final_campaign_status(&status(100, 20)),
            CampaignStatus::PartiallySent
        );
    }
}
