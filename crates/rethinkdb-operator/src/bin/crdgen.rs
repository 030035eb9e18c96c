use kube::core::CustomResourceExt;
use rethinkdb_operator::crds::cluster::RethinkDBCluster;

fn main() {
    println!(
        "{}",
        serde_yaml::to_string(&RethinkDBCluster::crd()).expect("serialize crd")
    );
}
