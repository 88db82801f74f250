//! Channel health state machine driven by a scripted probe transport

mod common;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quotagate::{
        error::GatewayError,
        persistence::RecordStore,
        services::{ProbeError, ProbeOutcome},
        types::{Channel, ChannelStatus},
    };

    use crate::common::{harness, healthy, test_config, unauthorized};

    async fn channel(store: &dyn RecordStore, status: ChannelStatus) -> i64 {
        store
            .insert_channels(vec![Channel {
                name: format!("{status}"),
                key: "sk-upstream".into(),
                status,
                models: vec!["gpt-4o".into()],
                ..Default::default()
            }])
            .await
            .unwrap()[0]
    }

    async fn settle_notifications() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn disables_after_consecutive_fatal_probes() {
        let mut config = test_config();
        config.channel_disable_after = 3;
        let h = harness(config);
        let id = channel(h.store.as_ref(), ChannelStatus::Enabled).await;
        h.gateway.cache.sync().await.unwrap();

        h.transport.push(id, unauthorized());
        h.transport.push(id, unauthorized());
        // a success in between resets the streak
        h.transport.push(id, healthy());
        for _ in 0..3 {
            h.transport.push(id, unauthorized());
        }
        for round in 1..=5 {
            let report = h.gateway.health.test_channel(id).await.unwrap();
            assert!(report.transition.is_none(), "round {round}");
        }
        let report = h.gateway.health.test_channel(id).await.unwrap();
        assert!(matches!(report.outcome, ProbeOutcome::Fatal(_)));
        assert_eq!(report.transition.map(|t| t.to), Some(ChannelStatus::AutoDisabled));

        let stored = h.store.get_channel(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChannelStatus::AutoDisabled);
        assert!(stored.disabled_reason.is_some_and(|r| !r.is_empty()));
        assert_eq!(
            h.gateway.cache.roster().get(id).unwrap().status,
            ChannelStatus::AutoDisabled
        );
        settle_notifications().await;
        let sent = h.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "root@example.com");
    }

    #[tokio::test]
    async fn recovers_after_one_healthy_probe() {
        let h = harness(test_config());
        let id = channel(h.store.as_ref(), ChannelStatus::AutoDisabled).await;
        let report = h.gateway.health.test_channel(id).await.unwrap();
        assert_eq!(report.outcome, ProbeOutcome::Healthy);
        assert_eq!(report.transition.map(|t| t.to), Some(ChannelStatus::Enabled));
        let stored = h.store.get_channel(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChannelStatus::Enabled);
        assert!(stored.test_time > 0);
    }

    #[tokio::test]
    async fn zero_completion_tokens_do_not_recover() {
        let h = harness(test_config());
        let id = channel(h.store.as_ref(), ChannelStatus::AutoDisabled).await;
        h.transport.push(
            id,
            Ok(quotagate::services::ProbeResponse {
                status: 200,
                completion_tokens: 0,
                error: None,
            }),
        );
        let report = h.gateway.health.test_channel(id).await.unwrap();
        assert!(matches!(report.outcome, ProbeOutcome::Fatal(_)));
        assert!(report.transition.is_none());
    }

    #[tokio::test]
    async fn manual_disable_is_never_overridden() {
        let h = harness(test_config());
        let id = channel(h.store.as_ref(), ChannelStatus::ManuallyDisabled).await;
        h.transport.push(id, unauthorized());
        h.transport.push(id, healthy());
        for _ in 0..2 {
            let report = h.gateway.health.test_channel(id).await.unwrap();
            assert!(report.transition.is_none());
        }
        assert_eq!(
            h.store.get_channel(id).await.unwrap().unwrap().status,
            ChannelStatus::ManuallyDisabled
        );
    }

    #[tokio::test]
    async fn transient_failures_never_disable() {
        let h = harness(test_config());
        let id = channel(h.store.as_ref(), ChannelStatus::Enabled).await;
        for _ in 0..5 {
            h.transport.push(
                id,
                Err(ProbeError::Connect {
                    msg: "connection refused".into(),
                }),
            );
        }
        for _ in 0..5 {
            let report = h.gateway.health.test_channel(id).await.unwrap();
            assert!(matches!(report.outcome, ProbeOutcome::Transient(_)));
        }
        assert_eq!(
            h.store.get_channel(id).await.unwrap().unwrap().status,
            ChannelStatus::Enabled
        );
    }

    #[tokio::test]
    async fn auto_disable_switch_is_respected() {
        let mut config = test_config();
        config.automatic_disable_channel = false;
        let h = harness(config);
        let id = channel(h.store.as_ref(), ChannelStatus::Enabled).await;
        h.transport.push(id, unauthorized());
        let report = h.gateway.health.test_channel(id).await.unwrap();
        assert!(matches!(report.outcome, ProbeOutcome::Fatal(_)));
        assert!(report.transition.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_times_out_as_fatal() {
        let mut config = test_config();
        config.probe_timeout = 1;
        let h = harness(config);
        let id = channel(h.store.as_ref(), ChannelStatus::Enabled).await;
        h.transport.set_delay(Duration::from_secs(5));
        let report = h.gateway.health.test_channel(id).await.unwrap();
        assert_eq!(
            report.outcome,
            ProbeOutcome::Fatal(ProbeError::Timeout.to_string())
        );
        assert_eq!(report.transition.map(|t| t.to), Some(ChannelStatus::AutoDisabled));
    }

    #[tokio::test]
    async fn sweep_covers_every_channel_and_reports() {
        let h = harness(test_config());
        let good = channel(h.store.as_ref(), ChannelStatus::Enabled).await;
        let bad = channel(h.store.as_ref(), ChannelStatus::Enabled).await;
        let back = channel(h.store.as_ref(), ChannelStatus::AutoDisabled).await;
        h.transport.push(bad, unauthorized());
        let report = h.gateway.health.run_sweep(true).await.unwrap();
        assert_eq!(report.tested, 3);
        assert_eq!((report.healthy, report.fatal), (2, 1));
        assert_eq!((report.disabled, report.enabled), (1, 1));
        assert_eq!(
            h.store.get_channel(good).await.unwrap().unwrap().status,
            ChannelStatus::Enabled
        );
        assert_eq!(
            h.store.get_channel(back).await.unwrap().unwrap().status,
            ChannelStatus::Enabled
        );
        settle_notifications().await;
        // disable, enable and the sweep summary
        assert_eq!(h.notifier.subjects().len(), 3);
    }

    #[tokio::test]
    async fn only_one_sweep_at_a_time() {
        let h = harness(test_config());
        channel(h.store.as_ref(), ChannelStatus::Enabled).await;
        h.transport.set_delay(Duration::from_millis(200));
        h.gateway.health.test_all(false).unwrap();
        tokio::task::yield_now().await;
        assert!(h.gateway.health.is_sweeping());
        assert!(matches!(
            h.gateway.health.test_all(false),
            Err(GatewayError::SweepInProgress)
        ));
        assert!(matches!(
            h.gateway.health.run_sweep(false).await,
            Err(GatewayError::SweepInProgress)
        ));
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let h = harness(test_config());
        assert!(matches!(
            h.gateway.health.test_channel(404).await,
            Err(GatewayError::ChannelNotFound { id: 404 })
        ));
    }
}
