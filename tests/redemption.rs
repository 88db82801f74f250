//! Redemption claims under contention

mod common;

#[cfg(test)]
mod tests {
    use quotagate::{
        error::GatewayError,
        persistence::RecordStore,
        types::{LogFilter, LogType, RedemptionStatus, Token, User},
    };

    use crate::common::{harness, test_config};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_redeemers_one_winner() {
        let h = harness(test_config());
        let alice = h
            .store
            .insert_user(User {
                quota: 5,
                ..Default::default()
            })
            .await
            .unwrap();
        let bob = h
            .store
            .insert_user(User {
                quota: 7,
                ..Default::default()
            })
            .await
            .unwrap();
        let issued = h.gateway.redemptions.create("launch", 300, 1).await.unwrap();
        let key = issued.keys[0].clone();

        let claims = [alice, bob].map(|uid| {
            let gateway = h.gateway.clone();
            let key = key.clone();
            tokio::spawn(async move { gateway.redemptions.redeem(&key, uid).await })
        });
        let mut outcomes = Vec::new();
        for claim in claims {
            outcomes.push(claim.await.unwrap());
        }
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .any(|r| matches!(r, Err(GatewayError::RedemptionAlreadyUsed)))
        );

        let a = h.store.get_user(alice).await.unwrap().unwrap().quota;
        let b = h.store.get_user(bob).await.unwrap().unwrap().quota;
        assert_eq!(a + b, 5 + 7 + 300);
        assert!(a == 305 || b == 307);

        let code = h.store.get_redemption_by_key(&key).await.unwrap().unwrap();
        assert_eq!(code.status, RedemptionStatus::Used);
        let winner = if a == 305 { alice } else { bob };
        assert_eq!(code.user_id, Some(winner));

        let topups = h
            .store
            .list_logs(&LogFilter {
                kind: Some(LogType::Topup),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(topups.len(), 1);
        assert_eq!(topups[0].user_id, winner);
    }

    #[tokio::test]
    async fn redeem_refreshes_cached_balance() {
        let h = harness(test_config());
        let uid = h
            .store
            .insert_user(User {
                quota: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        let token_id = h
            .store
            .insert_token(Token {
                user_id: uid,
                key: "sk-gift".into(),
                unlimited_quota: true,
                ..Default::default()
            })
            .await
            .unwrap();
        h.gateway.ledger.pre_consume(token_id, 4).await.unwrap();
        assert_eq!(h.gateway.cache.cached_user_quota(uid).await, Some(6));
        assert!(h.gateway.ledger.pre_consume(token_id, 50).await.is_err());

        let issued = h.gateway.redemptions.create("gift", 90, 1).await.unwrap();
        h.gateway.redemptions.redeem(&issued.keys[0], uid).await.unwrap();
        assert_eq!(h.gateway.cache.cached_user_quota(uid).await, None);
        h.gateway.ledger.pre_consume(token_id, 50).await.unwrap();
        assert_eq!(h.gateway.cache.cached_user_quota(uid).await, Some(46));
    }

    #[tokio::test]
    async fn unknown_user_keeps_code_enabled() {
        let h = harness(test_config());
        let issued = h.gateway.redemptions.create("gift", 90, 1).await.unwrap();
        assert!(matches!(
            h.gateway.redemptions.redeem(&issued.keys[0], 999).await,
            Err(GatewayError::UserNotFound { id: 999 })
        ));
        let code = h
            .store
            .get_redemption_by_key(&issued.keys[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code.status, RedemptionStatus::Enabled);
    }
}
