use k23si_transport::{accept_side_qp, Dispatcher};
use k23si_transport::RdmaChannel;
use k23si_wire::Endpoint;

#[test]
fn accept_side_qp_shifts_left_by_eight_bits() {
    assert_eq!(accept_side_qp(1), 256);
    assert_eq!(accept_side_qp(0), 0);
    assert_ne!(accept_side_qp(7), 7);
}

#[tokio::test]
async fn dial_and_accept_sides_key_distinctly_in_the_dispatcher() {
    let dial_qp = 7u32;
    let accept_qp = accept_side_qp(dial_qp);
    let dial_ep = Endpoint::from_url(&format!("rrdma+k2rpc://127.0.0.1:{dial_qp}")).unwrap();
    let accept_ep = Endpoint::from_url(&format!("rrdma+k2rpc://127.0.0.1:{accept_qp}")).unwrap();
    assert_ne!(dial_ep, accept_ep);

    let (dial_side, accept_side) = RdmaChannel::pair(dial_ep.clone(), accept_ep.clone());

    let dispatcher = Dispatcher::new();
    dispatcher.start();
    dispatcher.register_channel(dial_side).unwrap();
    dispatcher.register_channel(accept_side).unwrap();

    assert_eq!(dispatcher.channel_count(), 2);
}
