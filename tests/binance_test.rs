// Wire-level tests for the Binance futures gateway against a local mock
// server.

use mockito::Matcher;

use zscorebot::exchange::{ExchangeError, ExchangeGateway};

fn gateway(url: String) -> zscorebot::exchange::BinanceFutures {
    zscorebot::exchange::BinanceFutures::with_base_url("key".into(), "secret".into(), url)
}

#[tokio::test]
async fn test_klines_parse_into_candles() {
    let mut server = mockito::Server::new_async().await;
    let body = r#"[
        [1609459200000,"600.10","605.00","598.00","601.25","12345.6",1609460099999,"0",10,"0","0","0"],
        [1609460100000,"601.25","602.00","599.50","600.00","9876.5",1609460999999,"0",11,"0","0","0"]
    ]"#;
    let mock = server
        .mock("GET", "/fapi/v1/klines")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "BNBUSDT".into()),
            Matcher::UrlEncoded("interval".into(), "15m".into()),
            Matcher::UrlEncoded("limit".into(), "40".into()),
        ]))
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let candles = gateway(server.url())
        .get_candles("BNBUSDT", "15m", 40)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].open, 600.10);
    assert_eq!(candles[0].close, 601.25);
    assert_eq!(candles[1].open_time.timestamp_millis(), 1609460100000);
    assert!(candles[0].open_time < candles[1].open_time);
}

#[tokio::test]
async fn test_insufficient_margin_maps_to_tagged_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/fapi/v1/order")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"code":-2019,"msg":"Margin is insufficient."}"#)
        .create_async()
        .await;

    let order = zscorebot::exchange::OrderRequest {
        symbol: "BNBUSDT".into(),
        side: zscorebot::models::OrderSide::Buy,
        quantity: 1.0,
        order_type: zscorebot::exchange::OrderType::Market,
        reduce_only: false,
        client_order_id: None,
    };
    let result = gateway(server.url()).place_order(&order).await;
    assert_eq!(result, Err(ExchangeError::InsufficientMargin));
}

#[tokio::test]
async fn test_rate_limit_status_maps_to_transient_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v2/balance")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_body(r#"{"code":-1003,"msg":"Too many requests."}"#)
        .create_async()
        .await;

    let result = gateway(server.url()).get_balance("USDT").await;
    assert_eq!(result, Err(ExchangeError::RateLimited));
    assert!(result.unwrap_err().is_transient());
}

#[tokio::test]
async fn test_zero_position_amount_reports_flat() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v2/positionRisk")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"[{"symbol":"BNBUSDT","positionAmt":"0","entryPrice":"0.0","unRealizedProfit":"0"}]"#,
        )
        .create_async()
        .await;

    let position = gateway(server.url())
        .get_open_position("BNBUSDT")
        .await
        .unwrap();
    assert!(position.is_none());
}

#[tokio::test]
async fn test_negative_position_amount_reports_short() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v2/positionRisk")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"[{"symbol":"BNBUSDT","positionAmt":"-2.5","entryPrice":"605.0","unRealizedProfit":"-3.1"}]"#,
        )
        .create_async()
        .await;

    let position = gateway(server.url())
        .get_open_position("BNBUSDT")
        .await
        .unwrap()
        .expect("position");
    assert_eq!(position.side, zscorebot::models::Side::Short);
    assert_eq!(position.quantity, 2.5);
    assert_eq!(position.entry_price, 605.0);
}

#[tokio::test]
async fn test_order_status_filled_carries_fill_price() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v1/order")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"orderId":100,"status":"FILLED","avgPrice":"550.20","executedQty":"9.09"}"#)
        .create_async()
        .await;

    let status = gateway(server.url())
        .get_order_status("BNBUSDT", "100")
        .await
        .unwrap();
    assert_eq!(
        status,
        zscorebot::exchange::OrderStatus::Filled {
            price: 550.20,
            quantity: 9.09
        }
    );
}

#[tokio::test]
async fn test_margin_mode_already_set_is_success() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/fapi/v1/marginType")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"code":-4046,"msg":"No need to change margin type."}"#)
        .create_async()
        .await;

    let result = gateway(server.url())
        .set_margin_mode("BNBUSDT", zscorebot::exchange::MarginMode::Isolated)
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_exchange_info_filters_become_limits() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v1/exchangeInfo")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"symbols":[{"symbol":"BNBUSDT","filters":[
                {"filterType":"LOT_SIZE","stepSize":"0.01","minQty":"0.01","maxQty":"10000"},
                {"filterType":"MIN_NOTIONAL","notional":"5"}
            ]}]}"#,
        )
        .create_async()
        .await;

    let limits = gateway(server.url())
        .get_instrument_limits("BNBUSDT")
        .await
        .unwrap();
    assert_eq!(limits.quantity_step, 0.01);
    assert_eq!(limits.min_quantity, 0.01);
    assert_eq!(limits.max_quantity, Some(10_000.0));
    assert_eq!(limits.min_notional, 5.0);
}

#[tokio::test]
async fn test_requests_carry_api_key_header_and_signature() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/fapi/v2/balance")
        .match_header("X-MBX-APIKEY", "key")
        .match_query(Matcher::AllOf(vec![
            Matcher::Regex("timestamp=\\d+".into()),
            Matcher::Regex("signature=[0-9a-f]{64}".into()),
        ]))
        .with_status(200)
        .with_body(r#"[{"asset":"USDT","availableBalance":"10000.0"}]"#)
        .create_async()
        .await;

    let balance = gateway(server.url()).get_balance("USDT").await.unwrap();
    mock.assert_async().await;
    assert_eq!(balance, 10_000.0);
}
