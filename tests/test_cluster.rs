use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use maplit::btreemap;
use maplit::btreeset;
use openraft::BasicNode;
use raft3d::client::Raft3dClient;
use raft3d::config::NodeConfig;
use raft3d::error::ErrorBody;
use raft3d::models::FilamentType;
use raft3d::models::PrintJobStatus;
use raft3d::network::api::NewFilament;
use raft3d::network::api::NewPrintJob;
use raft3d::network::api::NewPrinter;
use raft3d::start_raft_node;
use raft3d::NodeId;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

fn get_addr(node_id: NodeId) -> anyhow::Result<String> {
    let addr = match node_id {
        1 => "127.0.0.1:22001".to_string(),
        2 => "127.0.0.1:22002".to_string(),
        3 => "127.0.0.1:22003".to_string(),
        _ => {
            return Err(anyhow::anyhow!("node {} not found", node_id));
        }
    };
    Ok(addr)
}

fn spawn_node(node_id: NodeId) -> anyhow::Result<thread::JoinHandle<()>> {
    let addr = get_addr(node_id)?;
    Ok(thread::spawn(move || {
        let rt = Runtime::new().unwrap();
        let x = rt.block_on(start_raft_node(node_id, addr, NodeConfig::default()));
        println!("node {} exit: {:?}", node_id, x);
    }))
}

/// Poll `f` until it returns true, for at most 5 seconds.
async fn wait_until<F, Fut>(what: &str, mut f: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<bool>>,
{
    for _ in 0..50 {
        if f().await? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(anyhow::anyhow!("timeout waiting for: {}", what))
}

/// Setup a cluster of 3 nodes.
/// Run the print farm workflow through the leader and read it back from a follower.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_cluster() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Start 3 raft node in 3 threads.

    let _h1 = spawn_node(1)?;
    let _h2 = spawn_node(2)?;
    let _h3 = spawn_node(3)?;

    // Wait for server to start up.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = Raft3dClient::new(1, get_addr(1)?);

    // --- 1. Initialize node 1 as a cluster of only one node.

    println!("=== init single node cluster");
    client.init().await?;

    let c = &client;
    wait_until("node 1 becomes leader", move || async move {
        Ok(c.metrics().await?.current_leader == Some(1))
    })
    .await?;

    // --- 2. Node 2 is added as learner and node 3 joins as a voter directly.

    println!("=== add-learner 2");
    client.add_learner((2, get_addr(2)?)).await?;

    println!("=== join 3");
    client.join(3, get_addr(3)?).await?;

    let x = client.metrics().await?;
    let nodes_in_cluster =
        x.membership_config.nodes().map(|(nid, node)| (*nid, node.clone())).collect::<BTreeMap<_, _>>();
    assert_eq!(
        btreemap! {
            1 => BasicNode::new("127.0.0.1:22001"),
            2 => BasicNode::new("127.0.0.1:22002"),
            3 => BasicNode::new("127.0.0.1:22003"),
        },
        nodes_in_cluster
    );
    assert_eq!(
        &vec![btreeset![1, 3]],
        x.membership_config.membership().get_joint_config()
    );

    // --- 3. Turn the learner into a member.

    println!("=== change-membership to 1,2,3");
    client.change_membership(&btreeset! {1,2,3}).await?;

    let x = client.metrics().await?;
    assert_eq!(
        &vec![btreeset![1, 2, 3]],
        x.membership_config.membership().get_joint_config()
    );

    let status = client.status().await?;
    assert_eq!(1, status.node);
    assert_eq!(Some(1), status.current_leader);

    // --- 4. Register a printer, a spool and two jobs.

    println!("=== create printer, filament, jobs");
    client
        .create_printer(&NewPrinter {
            id: "P1".to_string(),
            company: "Prusa".to_string(),
            model: "MK4".to_string(),
        })
        .await?;

    let f = client
        .create_filament(&NewFilament {
            id: "F1".to_string(),
            filament_type: FilamentType::PLA,
            color: "red".to_string(),
            total_weight_grams: 1000,
        })
        .await?;
    assert_eq!(1000, f.remaining_weight_grams);

    for (id, weight) in [("J1", 400), ("J2", 700)] {
        let job = client
            .create_print_job(&NewPrintJob {
                id: id.to_string(),
                printer_id: "P1".to_string(),
                filament_id: "F1".to_string(),
                file: format!("{}.gcode", id),
                print_weight_grams: weight,
            })
            .await?;
        assert_eq!(PrintJobStatus::Queued, job.status);
    }

    let res = client
        .create_print_job(&NewPrintJob {
            id: "J3".to_string(),
            printer_id: "P404".to_string(),
            filament_id: "F1".to_string(),
            file: "J3.gcode".to_string(),
            print_weight_grams: 10,
        })
        .await;
    assert_eq!(Some(400), res.err().and_then(|e| e.status()));

    // --- 5. Drive the jobs through their lifecycle.

    println!("=== J1: Queued -> Done is rejected");
    let res = client.update_job_status("J1", PrintJobStatus::Done).await;
    let err = res.err().ok_or_else(|| anyhow::anyhow!("expect invalid transition"))?;
    assert_eq!(Some(400), err.status());
    assert_eq!(Some("invalid-transition"), err.kind());

    println!("=== J1: Running -> Done");
    client.update_job_status("J1", PrintJobStatus::Running).await?;
    let changed = client.update_job_status("J1", PrintJobStatus::Done).await?;
    assert_eq!("success", changed.status);
    assert_eq!(600, client.get_filament("F1").await?.remaining_weight_grams);

    println!("=== J1: a done job can not be created again");
    let res = client
        .create_print_job(&NewPrintJob {
            id: "J1".to_string(),
            printer_id: "P1".to_string(),
            filament_id: "F1".to_string(),
            file: "J1.gcode".to_string(),
            print_weight_grams: 400,
        })
        .await;
    let err = res.err().ok_or_else(|| anyhow::anyhow!("expect job exists"))?;
    assert_eq!(Some(409), err.status());
    assert_eq!(Some("job-exists"), err.kind());

    println!("=== J2: Running -> Done, not enough filament");
    client.update_job_status("J2", PrintJobStatus::Running).await?;
    let res = client.update_job_status("J2", PrintJobStatus::Done).await;
    let err = res.err().ok_or_else(|| anyhow::anyhow!("expect insufficient filament"))?;
    assert_eq!(Some("insufficient-filament"), err.kind());
    assert_eq!(600, client.get_filament("F1").await?.remaining_weight_grams);

    println!("=== J2: Canceled is terminal");
    client.update_job_status("J2", PrintJobStatus::Canceled).await?;
    let res = client.update_job_status("J2", PrintJobStatus::Running).await;
    assert_eq!(Some("invalid-transition"), res.err().and_then(|e| e.kind().map(|k| k.to_string())).as_deref());

    let res = client.update_job_status("J404", PrintJobStatus::Running).await;
    assert_eq!(Some(404), res.err().and_then(|e| e.status()));

    // --- 6. Followers serve reads from their replica.

    println!("=== read from follower 2");
    let follower = Raft3dClient::new(2, get_addr(2)?);
    let fc = &follower;
    wait_until("follower 2 applies every write", move || async move {
        let jobs = fc.list_print_jobs().await?;
        Ok(jobs.iter().any(|j| j.id == "J2" && j.status == PrintJobStatus::Canceled))
    })
    .await?;

    assert_eq!(vec!["P1".to_string()], follower.list_printers().await?.into_iter().map(|p| p.id).collect::<Vec<_>>());
    assert_eq!(600, follower.get_filament("F1").await?.remaining_weight_grams);
    let res = follower.get_filament("F404").await;
    assert_eq!(Some(404), res.err().and_then(|e| e.status()));

    let jobs = follower.list_print_jobs().await?;
    assert_eq!(
        vec![
            ("J1".to_string(), PrintJobStatus::Done),
            ("J2".to_string(), PrintJobStatus::Canceled)
        ],
        jobs.into_iter().map(|j| (j.id, j.status)).collect::<Vec<_>>()
    );

    // --- 7. Followers reject writes and name the leader.

    println!("=== write to follower 2 is rejected");
    let http = reqwest::Client::new();
    let resp = http
        .post(format!("http://{}/printers", get_addr(2)?))
        .json(&NewPrinter {
            id: "P2".to_string(),
            company: "Bambu".to_string(),
            model: "X1".to_string(),
        })
        .send()
        .await?;
    assert_eq!(503, resp.status().as_u16());
    let body: ErrorBody = resp.json().await?;
    assert_eq!("not-leader", body.error);
    assert_eq!(Some(1), body.leader.map(|l| l.id));

    let resp = http
        .post(format!("http://{}/join", get_addr(2)?))
        .json(&serde_json::json!({"id": 4, "address": "127.0.0.1:22004"}))
        .send()
        .await?;
    assert_eq!(403, resp.status().as_u16());

    // A client pointed at a follower is redirected to the leader.
    follower
        .create_printer(&NewPrinter {
            id: "P2".to_string(),
            company: "Bambu".to_string(),
            model: "X1".to_string(),
        })
        .await?;
    assert_eq!(1, follower.leader.lock().unwrap().0);

    Ok(())
}
