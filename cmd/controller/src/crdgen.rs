use kube::CustomResourceExt;
use nodepool_operator::crd::nodeclaim::NodeClaim;
use nodepool_operator::crd::nodepool::NodePool;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&NodePool::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&NodeClaim::crd())?);
    Ok(())
}
