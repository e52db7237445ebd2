//! Integration tests for strata-sqlite: the driver on an on-disk database
//! bound through a volume.

use std::sync::Arc;

use strata_core::{
    DeleteRequest, DirectoryVolumeProvider, DriverConfiguration, DriverInstance,
    EntityExpireAccessDriver, EntityExpireUpdateDriver, EntityPublishDriver, EntityReadDriver,
    EntitySubscribeDriver, ExpireRequest, ObjectEntity, ResultType, VolumeProvider, now_millis,
};
use strata_sqlite::{PLUGIN, SqliteObjectDriver};

struct Bound {
    _dir: tempfile::TempDir,
    instance: DriverInstance,
    volumes: DirectoryVolumeProvider,
}

async fn bind(id: &str) -> Bound {
    let dir = tempfile::tempdir().unwrap();
    let volumes = DirectoryVolumeProvider::new(dir.path().join("volumes"));
    let configuration = DriverConfiguration::new(id, "strata-sqlite", "*");
    let instance = PLUGIN.types[0].construct(configuration.clone()).unwrap();
    let volume = volumes.get_volume(configuration.volume_id()).unwrap();
    instance.driver().bind_volume(volume).await.unwrap();
    Bound {
        _dir: dir,
        instance,
        volumes,
    }
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_owned()).collect()
}

fn tree() -> Vec<ObjectEntity> {
    vec![
        ObjectEntity::new("plant", "Plant", 10),
        ObjectEntity::new("line-1", "Line 1", 10).with_parent("plant"),
        ObjectEntity::new("press-1", "Press-1", 10)
            .with_parent("line-1")
            .with_content_type("machine")
            .with_definition("def-press"),
        ObjectEntity::new("press-2", "Press-2", 10)
            .with_parent("line-1")
            .with_content_type("machine")
            .with_definition("def-press"),
    ]
}

#[tokio::test]
async fn database_lives_in_the_volume_and_survives_reopen() {
    let bound = bind("objects").await;
    let publish = bound
        .instance
        .get::<dyn EntityPublishDriver<ObjectEntity>>()
        .unwrap();
    assert!(publish.publish(tree()).await.is_success());

    let path = bound.volumes.root().join("objects").join("objects.db");
    assert!(path.exists());
    bound.instance.driver().dispose().await;

    // A second instance over the same volume sees the same rows.
    let configuration = DriverConfiguration::new("objects", "strata-sqlite", "*");
    let reopened = Arc::new(SqliteObjectDriver::new(configuration).unwrap());
    let volume = bound.volumes.get_volume("objects").unwrap();
    strata_core::Driver::bind_volume(reopened.as_ref(), volume).await.unwrap();
    let count = reopened.count().await.into_content();
    assert_eq!(count, vec![4]);
}

#[tokio::test]
async fn relational_queries_distinguish_empty_from_missing() {
    let bound = bind("relations").await;
    let publish = bound
        .instance
        .get::<dyn EntityPublishDriver<ObjectEntity>>()
        .unwrap();
    publish.publish(tree()).await;
    let query = bound.instance.get::<SqliteObjectDriver>().unwrap();

    let children = query.query_children(&ids(&["line-1", "press-1", "ghost"])).await;
    let matches = children.content();
    let under_line: Vec<&str> = matches
        .iter()
        .filter(|m| m.query == "line-1")
        .map(|m| m.uuid.as_str())
        .collect();
    assert_eq!(under_line, vec!["press-1", "press-2"]);
    assert_eq!(children.result_type_for("press-1"), Some(ResultType::Empty));
    assert_eq!(children.result_type_for("ghost"), Some(ResultType::NotFound));

    let parents = query.query_parent(&ids(&["press-1", "plant", "ghost"])).await;
    assert_eq!(parents.content()[0].uuid, "line-1");
    assert_eq!(parents.result_type_for("plant"), Some(ResultType::Empty));
    assert_eq!(parents.result_type_for("ghost"), Some(ResultType::NotFound));

    let roots = query.query_root().await.into_content();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].uuid, "plant");
}

#[tokio::test]
async fn pattern_and_column_queries() {
    let bound = bind("patterns").await;
    let publish = bound
        .instance
        .get::<dyn EntityPublishDriver<ObjectEntity>>()
        .unwrap();
    publish.publish(tree()).await;
    let query = bound.instance.get::<SqliteObjectDriver>().unwrap();

    let by_name = query.query_by_name(&ids(&["press*", "lathe"])).await;
    assert_eq!(by_name.content().len(), 2);
    assert_eq!(by_name.result_type_for("lathe"), Some(ResultType::Empty));

    let by_type = query.query_by_content_type(&ids(&["MACHINE"])).await;
    assert_eq!(by_type.content().len(), 2);

    let by_definition = query.query_by_definition(&ids(&["def-press"])).await;
    assert_eq!(by_definition.content().len(), 2);
}

#[tokio::test]
async fn expiration_uses_update_and_access_columns() {
    let bound = bind("expiry").await;
    let instance = &bound.instance;
    let publish = instance.get::<dyn EntityPublishDriver<ObjectEntity>>().unwrap();
    let read = instance.get::<dyn EntityReadDriver<ObjectEntity>>().unwrap();
    let by_update = instance.get::<dyn EntityExpireUpdateDriver<ObjectEntity>>().unwrap();
    let by_access = instance.get::<dyn EntityExpireAccessDriver<ObjectEntity>>().unwrap();

    publish.publish(tree()).await;
    let written = now_millis();

    // Not yet due.
    let none = by_update.expire_by_update(&[ExpireRequest::new("plant", 1)]).await;
    assert!(none.is_empty());

    let removed = by_update
        .expire_by_update(&[ExpireRequest::new("plant", written + 1_000)])
        .await;
    assert_eq!(removed.content()[0].target, "plant");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    read.read(&ids(&["press-1"])).await;

    // Everything except press-1 was last accessed at publish time.
    let stale = by_access.expire_by_access_before(written + 10).await;
    assert_eq!(stale.len(), 2);
    let left = read.read(&ids(&["press-1", "press-2"])).await;
    assert_eq!(left.result_type_for("press-1"), Some(ResultType::Ok));
    assert_eq!(left.result_type_for("press-2"), Some(ResultType::NotFound));

    let rejected = by_access.expire_by_access_before(-5).await;
    assert_eq!(rejected.results[0].result_type, ResultType::InternalError);
}

#[tokio::test]
async fn delete_and_subscribe() {
    let bound = bind("feed").await;
    let instance = &bound.instance;
    let subscribe = instance.get::<dyn EntitySubscribeDriver<ObjectEntity>>().unwrap();
    let publish = instance.get::<dyn EntityPublishDriver<ObjectEntity>>().unwrap();
    let query = instance.get::<SqliteObjectDriver>().unwrap();

    let mut consumer = subscribe.subscribe().await.into_content().pop().unwrap();
    let live = ObjectEntity::new("live", "Live", query.started_at() + 1);
    publish.publish(vec![live.clone()]).await;
    assert_eq!(consumer.recv().await.unwrap(), vec![live]);

    let deleter = instance
        .get::<dyn strata_core::EntityDeleteDriver<ObjectEntity>>()
        .unwrap();
    let deleted = deleter.delete(&[DeleteRequest::new("live")]).await;
    assert!(deleted.is_success());
    assert_eq!(query.count().await.into_content(), vec![0]);
}
