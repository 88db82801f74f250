//! Request path control flow: admit, settle, refund

mod common;

#[cfg(test)]
mod tests {
    use quotagate::{
        error::GatewayError,
        persistence::RecordStore,
        services::Usage,
        types::{Channel, LogFilter, LogType, Token},
    };

    use crate::common::{harness, test_config, user_with_token};

    async fn seed_channel(store: &dyn RecordStore) -> i64 {
        store
            .insert_channels(vec![Channel {
                name: "primary".into(),
                models: vec!["gpt-4o".into()],
                ..Default::default()
            }])
            .await
            .unwrap()[0]
    }

    fn token() -> Token {
        Token {
            key: "sk-caller".into(),
            name: "caller".into(),
            remain_quota: 100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn admit_and_settle_end_to_end() {
        let h = harness(test_config());
        let channel_id = seed_channel(h.store.as_ref()).await;
        let (user_id, token_id) = user_with_token(&h.store, 1000, token()).await;
        h.gateway.cache.sync().await.unwrap();

        let admission = h
            .gateway
            .admit("sk-caller", "default", "gpt-4o", 30)
            .await
            .unwrap();
        assert_eq!(admission.channel.id, channel_id);
        assert_eq!(admission.reservation.amount, 30);

        h.gateway
            .settle(
                &admission,
                Usage {
                    prompt_tokens: 12,
                    completion_tokens: 8,
                    quota: 25,
                },
            )
            .await
            .unwrap();

        let token = h.store.get_token(token_id).await.unwrap().unwrap();
        assert_eq!((token.remain_quota, token.used_quota), (75, 25));
        let user = h.store.get_user(user_id).await.unwrap().unwrap();
        assert_eq!((user.quota, user.used_quota, user.request_count), (975, 25, 1));
        let channel = h.store.get_channel(channel_id).await.unwrap().unwrap();
        assert_eq!(channel.used_quota, 25);

        let logs = h
            .store
            .list_logs(&LogFilter {
                kind: Some(LogType::Consume),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].token_name, "caller");
        assert_eq!(logs[0].model_name, "gpt-4o");
        assert_eq!(logs[0].quota, 25);
    }

    #[tokio::test]
    async fn coalesced_settle_lands_after_flush() {
        let mut config = test_config();
        config.batch_update_enabled = true;
        config.async_log_enabled = true;
        let h = harness(config);
        seed_channel(h.store.as_ref()).await;
        let (user_id, token_id) = user_with_token(&h.store, 1000, token()).await;
        h.gateway.cache.sync().await.unwrap();

        let admission = h
            .gateway
            .admit("sk-caller", "default", "gpt-4o", 30)
            .await
            .unwrap();
        h.gateway
            .settle(
                &admission,
                Usage {
                    quota: 40,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(h.store.get_user(user_id).await.unwrap().unwrap().quota, 1000);
        assert_eq!(h.store.log_count(), 0);

        let (deltas, logs) = h.gateway.flush().await;
        assert!(deltas.applied > 0);
        assert_eq!(logs.applied, 1);
        let token = h.store.get_token(token_id).await.unwrap().unwrap();
        assert_eq!((token.remain_quota, token.used_quota), (60, 40));
        assert_eq!(h.store.get_user(user_id).await.unwrap().unwrap().quota, 960);
    }

    #[tokio::test]
    async fn refund_restores_reservation() {
        let h = harness(test_config());
        seed_channel(h.store.as_ref()).await;
        let (user_id, token_id) = user_with_token(&h.store, 1000, token()).await;
        h.gateway.cache.sync().await.unwrap();
        let admission = h
            .gateway
            .admit("sk-caller", "default", "gpt-4o", 50)
            .await
            .unwrap();
        h.gateway.refund(&admission).await.unwrap();
        let token = h.store.get_token(token_id).await.unwrap().unwrap();
        assert_eq!((token.remain_quota, token.used_quota), (100, 0));
        assert_eq!(h.store.get_user(user_id).await.unwrap().unwrap().quota, 1000);
    }

    #[tokio::test]
    async fn admission_failures_leave_balances() {
        let h = harness(test_config());
        seed_channel(h.store.as_ref()).await;
        let (user_id, _) = user_with_token(&h.store, 1000, token()).await;
        h.gateway.cache.sync().await.unwrap();

        assert!(matches!(
            h.gateway.admit("sk-caller", "default", "gpt-4o", 101).await,
            Err(GatewayError::InsufficientTokenQuota { .. })
        ));
        assert!(matches!(
            h.gateway.admit("sk-caller", "default", "claude", 1).await,
            Err(GatewayError::NoChannelAvailable { .. })
        ));
        assert!(matches!(
            h.gateway.admit("sk-nobody", "default", "gpt-4o", 1).await,
            Err(GatewayError::TokenNotFound)
        ));
        assert_eq!(h.store.get_user(user_id).await.unwrap().unwrap().quota, 1000);
    }

    #[tokio::test]
    async fn settle_logs_charge_when_usage_counters_fail() {
        let h = harness(test_config());
        seed_channel(h.store.as_ref()).await;
        let (user_id, _) = user_with_token(&h.store, 1000, token()).await;
        h.gateway.cache.sync().await.unwrap();
        let admission = h
            .gateway
            .admit("sk-caller", "default", "gpt-4o", 30)
            .await
            .unwrap();

        h.store.fail_op("add_user_request_count");
        h.gateway
            .settle(
                &admission,
                Usage {
                    quota: 30,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        h.store.fail_writes(false);

        let user = h.store.get_user(user_id).await.unwrap().unwrap();
        assert_eq!((user.quota, user.request_count), (970, 0));
        let logs = h
            .store
            .list_logs(&LogFilter {
                kind: Some(LogType::Consume),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].quota, 30);
    }
}
