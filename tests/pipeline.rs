use netfeat::extractor::source::TSHARK_FIELDS;
use netfeat::extractor::{
    ExtractorConfig, FeatureExtractor, KeyClass, KeyKind, RawRow, TsvSource,
};

fn small_config() -> ExtractorConfig {
    ExtractorConfig {
        lambdas: vec![0.1],
        max_hosts: 10,
        max_sessions: 10,
        ..ExtractorConfig::default()
    }
}

fn tcp(ts: &str, len: &str, mac: &str, src: (&str, &str), dst: (&str, &str)) -> RawRow {
    RawRow {
        timestamp: ts.into(),
        frame_len: len.into(),
        eth_src: mac.into(),
        eth_dst: "ff:00:00:00:00:00".into(),
        ip_src: src.0.into(),
        ip_dst: dst.0.into(),
        tcp_srcport: src.1.into(),
        tcp_dstport: dst.1.into(),
        ..Default::default()
    }
}

fn column(ex: &FeatureExtractor, name: &str) -> usize {
    ex.header().iter().position(|h| h == name).unwrap()
}

#[test]
fn three_packet_conversation() {
    let mut ex = FeatureExtractor::new(small_config()).unwrap();
    assert_eq!(ex.width(), 23);

    let p1 = tcp("0.0", "100", "aa:00:00:00:00:01", ("10.0.0.1", "80"), ("10.0.0.2", "4000"));
    let p2 = tcp("0.1", "200", "aa:00:00:00:00:02", ("10.0.0.2", "4000"), ("10.0.0.1", "80"));
    let p3 = RawRow {
        timestamp: "0.2".into(),
        frame_len: "64".into(),
        eth_src: "aa:00:00:00:00:03".into(),
        eth_dst: "aa:00:00:00:00:01".into(),
        ip_src: "10.0.0.3".into(),
        ip_dst: "10.0.0.1".into(),
        udp_srcport: "53".into(),
        udp_dstport: "4001".into(),
        ..Default::default()
    };

    let v1 = ex.extract(&p1).unwrap().unwrap();
    let v2 = ex.extract(&p2).unwrap().unwrap();
    let v3 = ex.extract(&p3).unwrap().unwrap();

    for v in [&v1, &v2, &v3] {
        assert_eq!(v.len(), ex.width());
    }

    // Nothing precedes the first packet.
    assert!(v1.iter().all(|x| *x == 0.0));

    // The reply shares the bidirectional channel with the request.
    let bi_weight = column(&ex, "sock_bi_L0.1_weight");
    let bi_mean = column(&ex, "sock_bi_L0.1_mean");
    let dir_weight = column(&ex, "sock_dir_L0.1_weight");
    assert!((v2[bi_weight] - (-0.01f64).exp()).abs() < 1e-9);
    assert!((v2[bi_mean] - 100.0).abs() < 1e-9);
    assert_eq!(v2[dir_weight], 0.0);

    let pair = ex
        .registry(KeyKind::SocketPair)
        .unwrap()
        .get("10.0.0.1:80<->10.0.0.2:4000")
        .unwrap();
    assert!(pair.total_weight(0.2) > v2[bi_weight]);

    // A new host starts from empty accumulators on every channel.
    assert!(v3.iter().all(|x| *x == 0.0));
    assert!(ex.registry(KeyKind::Host).unwrap().contains("10.0.0.3"));
    assert_eq!(ex.registry(KeyKind::SocketPair).unwrap().len(), 2);

    let stats = ex.stats();
    assert_eq!(stats.vectors_out, 3);
    assert_eq!(stats.evictions, 0);
    assert_eq!(stats.protocols.tcp, 2);
    assert_eq!(stats.protocols.udp, 1);
    assert!(stats.reconciles());
}

#[test]
fn tsv_replay_reconciles_drops() {
    let lines = [
        "0.000\t100\taa:01\taa:02\t10.0.0.1\t10.0.0.2\t80\t4000",
        "0.050\tabc\taa:01\taa:02\t10.0.0.1\t10.0.0.2\t80\t4000",
        "0.100\t60",
        "0.150\t42\taa:03\tff:ff\t\t\t\t\t\t\t\t\t1\taa:03\t10.0.0.3\t00:00\t10.0.0.1",
        "0.200\t200\taa:02\taa:01\t10.0.0.2\t10.0.0.1\t4000\t80",
    ];
    let mut text = TSHARK_FIELDS.join("\t");
    for line in lines {
        text.push('\n');
        text.push_str(line);
    }
    text.push('\n');

    let path = std::env::temp_dir().join(format!("netfeat-e2e-{}.tsv", std::process::id()));
    std::fs::write(&path, text).unwrap();

    let mut ex = FeatureExtractor::new(ExtractorConfig::default()).unwrap();
    let source = TsvSource::open(&path).unwrap();
    let results: Vec<_> = ex.stream(source, None).collect();
    let _ = std::fs::remove_file(&path);

    let vectors: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let errors = results.iter().filter(|r| r.is_err()).count();
    assert_eq!(vectors.len(), 3);
    assert_eq!(errors, 1);
    assert!(vectors.iter().all(|v| v.len() == 115));

    let stats = ex.stats();
    assert_eq!(stats.records_seen, 5);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.no_signal, 1);
    assert_eq!(stats.records_seen - stats.dropped(), stats.vectors_out);
    assert_eq!(stats.protocols.arp, 1);

    // Two MACs from the conversation plus the ARP sender.
    assert_eq!(ex.registry(KeyKind::Mac).unwrap().len(), 3);
    assert!(ex.tracked(KeyClass::Session) > 0);
}

#[test]
fn capacity_holds_under_churn() {
    let config = ExtractorConfig {
        max_hosts: 8,
        max_sessions: 8,
        ..small_config()
    };
    let mut ex = FeatureExtractor::new(config).unwrap();

    for i in 0..500u32 {
        let src = format!("10.{}.{}.{}", i / 65536, (i / 256) % 256, i % 256);
        let port = (1024 + i % 30000).to_string();
        let ts = format!("{}", f64::from(i) * 0.001);
        let row = tcp(&ts, "80", "aa:00:00:00:00:01", (src.as_str(), port.as_str()), ("192.168.0.1", "443"));
        assert!(ex.extract(&row).unwrap().is_some());

        for kind in KeyKind::ALL {
            let reg = ex.registry(kind).unwrap();
            assert!(reg.len() <= reg.capacity());
        }
    }
    assert!(ex.stats().evictions > 0);
    assert!(ex.stats().reconciles());
}
