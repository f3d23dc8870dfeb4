//! Tests d'intégration du protocole de suppression/renumérotation

use lyxstore::{Category, Error, MemoryStore, SnapshotStore, Song, SongStore, StoreEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn hymn(n: u32) -> Song {
    Song {
        id: format!("H{}", n),
        title: format!("Hymn {}", n),
        category: Category::EnglishHymns,
        slides: vec![format!("Verse of hymn {}", n)],
    }
}

fn chorus(n: u32) -> Song {
    Song {
        id: format!("C{}", n),
        title: format!("Chorus {}", n),
        category: Category::EnglishChoruses,
        slides: vec![],
    }
}

async fn setup(songs: Vec<Song>) -> (SongStore, Arc<MemoryStore>, tempfile::TempDir) {
    let remote = Arc::new(MemoryStore::new());
    remote.seed_songs(songs);
    let dir = tempfile::tempdir().unwrap();
    let store = SongStore::new(remote.clone(), dir.path());
    store.initialize().await;
    (store, remote, dir)
}

async fn settle(store: &SongStore) {
    store.flush_commits().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_delete_renumbers_to_dense_sequence() {
    let (store, remote, _dir) = setup((1..=5).map(hymn).collect()).await;

    store.delete_song("H3").await.unwrap();

    // Mise à jour optimiste : le cache est déjà dense
    let ids: Vec<String> = store.songs().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["H1", "H2", "H3", "H4"]);

    // Le contenu a suivi le déplacement : l'ancien H4 est le nouveau H3
    assert_eq!(store.get_song("H3").unwrap().title, "Hymn 4");
    assert_eq!(store.get_song("H4").unwrap().title, "Hymn 5");

    // L'état distant converge après les commits
    settle(&store).await;
    let remote_ids: Vec<String> = remote.documents().into_iter().map(|s| s.id).collect();
    assert_eq!(remote_ids, vec!["H1", "H2", "H3", "H4"]);
    let remote_h3 = remote
        .documents()
        .into_iter()
        .find(|s| s.id == "H3")
        .unwrap();
    assert_eq!(remote_h3.title, "Hymn 4");
}

#[tokio::test]
async fn test_delete_highest_number_is_pure_delete() {
    let (store, remote, _dir) = setup((1..=5).map(hymn).collect()).await;

    store.delete_song("H5").await.unwrap();
    settle(&store).await;

    let ids: Vec<String> = store.songs().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["H1", "H2", "H3", "H4"]);
    // Aucun document n'a été réécrit
    assert_eq!(remote.documents()[3].title, "Hymn 4");
}

#[tokio::test]
async fn test_delete_leaves_other_prefixes_alone() {
    let mut songs: Vec<Song> = (1..=3).map(hymn).collect();
    songs.extend((1..=3).map(chorus));
    let (store, remote, _dir) = setup(songs).await;

    store.delete_song("H1").await.unwrap();
    settle(&store).await;

    let choruses: Vec<String> = remote
        .documents()
        .into_iter()
        .filter(|s| s.id.starts_with('C'))
        .map(|s| s.id)
        .collect();
    assert_eq!(choruses, vec!["C1", "C2", "C3"]);
}

#[tokio::test]
async fn test_delete_repairs_schedule_references() {
    let (store, remote, _dir) = setup((1..=5).map(hymn).collect()).await;

    // H4 est programmé ; après suppression de H3 il devient H3
    let item = store.add_to_schedule("H4").unwrap();
    store.delete_song("H3").await.unwrap();
    settle(&store).await;

    let schedule = store.schedule();
    assert_eq!(schedule.len(), 1);
    assert_eq!(schedule[0].song_id, "H3");
    assert_eq!(schedule[0].instance_id, item.instance_id);

    // La référence résout vers le bon contenu
    let resolved = store.get_song(&schedule[0].song_id).unwrap();
    assert_eq!(resolved.title, "Hymn 4");

    // Le document programme distant a été réécrit dans la même vague
    assert_eq!(remote.schedule().unwrap()[0].song_id, "H3");
}

#[tokio::test]
async fn test_reference_repair_broadcast_without_remote() {
    let (store, remote, dir) = setup((1..=5).map(hymn).collect()).await;

    let item = store.add_to_schedule("H4").unwrap();
    settle(&store).await;

    // Coupure réseau : seule la phase optimiste peut encore diffuser
    remote.set_offline(true);
    let mut rx = store.subscribe();
    store.delete_song("H3").await.unwrap();

    let repaired = loop {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no repaired schedule broadcast")
            .expect("event channel closed");
        match event {
            StoreEvent::ScheduleUpdated(items) if items[0].song_id == "H3" => break items,
            _ => {}
        }
    };
    assert_eq!(repaired.len(), 1);
    assert_eq!(repaired[0].instance_id, item.instance_id);

    // Le snapshot disque suit la réparation, lui aussi sans attendre
    let on_disk = SnapshotStore::new(dir.path())
        .load_schedule()
        .unwrap()
        .unwrap();
    assert_eq!(on_disk[0].song_id, "H3");
}

#[tokio::test]
async fn test_deleted_song_reference_dangles_gracefully() {
    let (store, _remote, _dir) = setup((1..=5).map(hymn).collect()).await;

    let item = store.add_to_schedule("H5").unwrap();
    store.delete_song("H5").await.unwrap();
    settle(&store).await;

    // La référence pendante reste listée mais ne résout plus
    let schedule = store.schedule();
    assert_eq!(schedule[0].song_id, "H5");
    assert!(store.get_song("H5").is_none());

    // Elle se retire normalement
    store.remove_from_schedule(&item.instance_id).unwrap();
    assert!(store.schedule().is_empty());
}

#[tokio::test]
async fn test_delete_unknown_song_is_an_error() {
    let (store, _remote, _dir) = setup((1..=2).map(hymn).collect()).await;

    assert!(matches!(
        store.delete_song("H9").await,
        Err(Error::SongNotFound(_))
    ));
    assert_eq!(store.songs().len(), 2);
}

#[tokio::test]
async fn test_delete_nonstandard_id_skips_renumbering() {
    let mut songs: Vec<Song> = (1..=3).map(hymn).collect();
    songs.push(Song {
        id: "H-legacy".into(),
        title: "Old import".into(),
        category: Category::EnglishHymns,
        slides: vec![],
    });
    let (store, remote, _dir) = setup(songs).await;

    store.delete_song("H-legacy").await.unwrap();
    settle(&store).await;

    let ids: Vec<String> = remote.documents().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["H1", "H2", "H3"]);

    // Un id hors format absent du cache est refusé comme les autres
    assert!(matches!(
        store.delete_song("not-in-cache").await,
        Err(Error::SongNotFound(_))
    ));
}

#[tokio::test]
async fn test_sequential_deletes_stay_dense() {
    let (store, remote, _dir) = setup((1..=6).map(hymn).collect()).await;

    store.delete_song("H2").await.unwrap();
    store.delete_song("H2").await.unwrap();
    settle(&store).await;

    let ids: Vec<String> = store.songs().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["H1", "H2", "H3", "H4"]);

    // H2 courant est l'ancien H4 (deux décalages successifs)
    assert_eq!(store.get_song("H2").unwrap().title, "Hymn 4");
    let remote_ids: Vec<String> = remote.documents().into_iter().map(|s| s.id).collect();
    assert_eq!(remote_ids, vec!["H1", "H2", "H3", "H4"]);
}
