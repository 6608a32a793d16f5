use gatherplan::graph::{Graph, OpKind, Producer};
use gatherplan::rewrite::{insert_gathers, SerialSet};
use gatherplan::spec::{NetSpec, SerialSpec};
use pretty_assertions::assert_eq;

fn net(json: &str) -> Graph {
    serde_json::from_str::<NetSpec>(json)
        .unwrap()
        .validate_and_build()
        .unwrap()
}

fn serial(names: &[&str]) -> SerialSet {
    names.iter().map(|s| s.to_string()).collect()
}

fn layout(g: &Graph) -> Vec<(String, Vec<String>, Vec<String>)> {
    g.operators()
        .iter()
        .map(|op| (op.name.clone(), op.inputs.clone(), op.outputs.clone()))
        .collect()
}

fn row(name: &str, inputs: &[&str], outputs: &[&str]) -> (String, Vec<String>, Vec<String>) {
    (
        name.to_string(),
        inputs.iter().map(|s| s.to_string()).collect(),
        outputs.iter().map(|s| s.to_string()).collect(),
    )
}

#[test]
fn all_exempt_graph_is_unchanged() {
    let g = net(
        r#"{ "inputs": ["a", "b"], "operators": [
            { "name": "acc", "type": "Accuracy", "inputs": ["a", "b"], "outputs": ["acc"] },
            { "name": "loss", "type": "SoftmaxWithLoss", "inputs": ["a", "b"], "outputs": ["l"] },
            { "name": "g", "type": "MPIGather", "inputs": ["l"], "outputs": ["gathered_l"] }
        ] }"#,
    );
    let rw = insert_gathers(&g, &serial(&["acc", "loss", "g"])).unwrap();
    assert_eq!(rw.graph, g);
    assert!(rw.report.inserted.is_empty());
}

#[test]
fn two_producers_get_two_gathers_nearest_first() {
    let g = net(
        r#"{ "operators": [
            { "name": "P1", "type": "Convolution", "outputs": ["a"] },
            { "name": "P2", "type": "Convolution", "outputs": ["b"] },
            { "name": "S", "type": "InnerProduct", "inputs": ["a", "b"], "outputs": ["s"] }
        ] }"#,
    );
    let rw = insert_gathers(&g, &serial(&["S"])).unwrap();
    assert_eq!(
        layout(&rw.graph),
        vec![
            row("P1", &[], &["a"]),
            row("P2", &[], &["b"]),
            row("gather_P2_to_S", &["b"], &["gathered_b"]),
            row("gather_P1_to_S", &["a"], &["gathered_a"]),
            row("S", &["gathered_a", "gathered_b"], &["s"]),
        ]
    );
    let s = rw.graph.position("S").unwrap();
    assert_eq!(rw.graph.producer_of(s, 0), Some(Producer::Op(3)));
    assert_eq!(rw.graph.producer_of(s, 1), Some(Producer::Op(2)));
}

#[test]
fn scnn_style_net_end_to_end() {
    let g = net(
        r#"{
            "name": "scnn",
            "inputs": ["data", "label"],
            "operators": [
                { "name": "conv1", "type": "Convolution", "inputs": ["data"], "outputs": ["conv1"] },
                { "name": "relu1", "type": "ReLU", "inputs": ["conv1"], "outputs": ["conv1"] },
                { "name": "pool1", "type": "Pooling", "inputs": ["conv1"], "outputs": ["pool1"] },
                { "name": "fc6", "type": "InnerProduct", "inputs": ["pool1"], "outputs": ["fc6"] },
                { "name": "fc7", "type": "InnerProduct", "inputs": ["fc6"], "outputs": ["fc7"] },
                { "name": "loss", "type": "SoftmaxWithLoss", "inputs": ["fc7", "label"], "outputs": ["loss"] },
                { "name": "accuracy", "type": "Accuracy", "inputs": ["fc7", "label"], "outputs": ["accuracy"] }
            ]
        }"#,
    );
    let serial_spec: SerialSpec =
        serde_json::from_str(r#"{ "names": ["loss", "accuracy"], "patterns": ["^fc"] }"#).unwrap();
    let set = serial_spec.resolve(&g).unwrap();

    let rw = insert_gathers(&g, &set).unwrap();
    let names: Vec<&str> = rw.graph.operators().iter().map(|o| o.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "conv1",
            "relu1",
            "pool1",
            "gather_pool1_to_fc6",
            "fc6",
            "fc7",
            "loss",
            "accuracy"
        ]
    );
    assert_eq!(rw.graph.operators()[3].kind, OpKind::Gather);
    assert_eq!(rw.graph.operators()[4].inputs, vec!["gathered_pool1"]);
    assert_eq!(rw.report.exempt, vec!["loss".to_string(), "accuracy".to_string()]);
    assert_eq!(rw.report.already_synchronized, vec!["fc7".to_string()]);

    // The rewrite output is itself a valid net and survives JSON.
    let json = NetSpec::from_graph(&rw.graph).to_json_pretty().unwrap();
    assert!(json.contains("\"MPIGather\""));
    let reloaded = serde_json::from_str::<NetSpec>(&json)
        .unwrap()
        .validate_and_build()
        .unwrap();
    assert_eq!(reloaded, rw.graph);
}

#[test]
fn rewrite_is_deterministic() {
    let json = r#"{ "operators": [
        { "name": "a", "type": "Convolution", "outputs": ["x", "y"] },
        { "name": "b", "type": "Convolution", "inputs": ["x"], "outputs": ["z"] },
        { "name": "s", "type": "Concat", "inputs": ["y", "z", "x"], "outputs": ["out"] }
    ] }"#;
    let first = insert_gathers(&net(json), &serial(&["s"])).unwrap();
    let second = insert_gathers(&net(json), &serial(&["s"])).unwrap();
    assert_eq!(first.graph, second.graph);
    assert_eq!(first.report, second.report);
    assert_eq!(
        layout(&first.graph)[2..].to_vec(),
        vec![
            row("gather_b_to_s", &["z"], &["gathered_z"]),
            row("gather_a_to_s", &["y", "x"], &["gathered_y", "gathered_x"]),
            row("s", &["gathered_y", "gathered_z", "gathered_x"], &["out"]),
        ]
    );
}

#[test]
fn two_serial_consumers_each_get_their_own_gather() {
    let g = net(
        r#"{ "operators": [
            { "name": "P", "type": "Convolution", "outputs": ["x"] },
            { "name": "S1", "type": "InnerProduct", "inputs": ["x"], "outputs": ["s1"] },
            { "name": "S2", "type": "InnerProduct", "inputs": ["x"], "outputs": ["s2"] }
        ] }"#,
    );
    let rw = insert_gathers(&g, &serial(&["S1", "S2"])).unwrap();
    assert_eq!(
        layout(&rw.graph),
        vec![
            row("P", &[], &["x"]),
            row("gather_P_to_S1", &["x"], &["gathered_x"]),
            row("S1", &["gathered_x"], &["s1"]),
            row("gather_P_to_S2", &["x"], &["gathered_x"]),
            row("S2", &["gathered_x"], &["s2"]),
        ]
    );
}

#[test]
fn parallel_operator_reading_serial_output_gets_no_gather() {
    let g = net(
        r#"{ "operators": [
            { "name": "conv", "type": "Convolution", "outputs": ["c"] },
            { "name": "fc", "type": "InnerProduct", "inputs": ["c"], "outputs": ["f"] },
            { "name": "relu", "type": "ReLU", "inputs": ["f"], "outputs": ["r"] },
            { "name": "pool", "type": "Pooling", "inputs": ["r", "c"], "outputs": ["p"] }
        ] }"#,
    );
    let rw = insert_gathers(&g, &serial(&["fc"])).unwrap();
    assert_eq!(
        layout(&rw.graph),
        vec![
            row("conv", &[], &["c"]),
            row("gather_conv_to_fc", &["c"], &["gathered_c"]),
            row("fc", &["gathered_c"], &["f"]),
            row("relu", &["f"], &["r"]),
            row("pool", &["r", "c"], &["p"]),
        ]
    );
    assert_eq!(rw.report.inserted.len(), 1);
}
