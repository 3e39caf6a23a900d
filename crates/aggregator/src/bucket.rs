//! 버킷과 버킷 리스트 모델
//!
//! [`Bucket`]은 버퍼링 중인 플로우 하나의 집계 상태입니다. 모든 버킷은
//! [`BucketPool`] 아레나에 저장되고 [`BucketId`] 핸들로만 참조됩니다.
//! 각 버킷은 두 개의 인덱스 기반 이중 연결 리스트에 동시에 속합니다:
//!
//! ```text
//!   slots[h] ──▶ B3 ◀──▶ B7 ◀──▶ B1        해시 체인 (Bucket::chain)
//!
//!   export.head ──▶ B1 ◀──▶ B3 ◀──▶ B7 ◀── export.tail
//!                                            내보내기 리스트 (Bucket::export)
//! ```
//!
//! 두 리스트를 함께 갱신하는 것은 해시 테이블의 insert/evict 헬퍼뿐입니다.

use bytes::BytesMut;

/// 아레나 안의 버킷 핸들
///
/// 슬롯이 재사용되면 세대(generation)가 바뀌므로 오래된 핸들은 무효가 됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId {
    index: u32,
    generation: u32,
}

impl BucketId {
    /// 아레나 슬롯 인덱스
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// 이중 연결 리스트 링크
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    /// 이전 버킷
    pub prev: Option<BucketId>,
    /// 다음 버킷
    pub next: Option<BucketId>,
}

impl Link {
    /// 양쪽 모두 비어 있는지 확인합니다.
    pub fn is_detached(&self) -> bool {
        self.prev.is_none() && self.next.is_none()
    }
}

/// 버킷 상태
///
/// `Created` → `Active` → 내보냄. 역방향 전이는 없습니다.
///
/// 내보낸 상태는 값으로 두지 않습니다. 만료 스캔이 버킷을 아레나에서 꺼내는 순간
/// ([`BucketPool::release`]) 핸들의 세대가 바뀌므로, 내보낸 버킷은 더 이상 조회되지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    /// 첫 패킷으로 생성됨
    Created,
    /// 이후 패킷이 병합됨
    Active,
}

/// 버퍼링 중인 플로우 하나
#[derive(Debug)]
pub struct Bucket {
    pub(crate) data: BytesMut,
    pub(crate) expire_time: u64,
    pub(crate) force_expire_time: u64,
    pub(crate) force_expiry: bool,
    pub(crate) hash: u32,
    pub(crate) observation_domain_id: u32,
    pub(crate) chain: Link,
    pub(crate) export: Link,
    pub(crate) in_table: bool,
    pub(crate) state: BucketState,
}

impl Bucket {
    /// 연결되지 않은 새 버킷을 만듭니다. 시각은 밀리초 단위입니다.
    pub fn new(
        data: BytesMut,
        observation_domain_id: u32,
        hash: u32,
        expire_time: u64,
        force_expire_time: u64,
    ) -> Self {
        Self {
            data,
            expire_time,
            force_expire_time,
            force_expiry: false,
            hash,
            observation_domain_id,
            chain: Link::default(),
            export: Link::default(),
            in_table: false,
            state: BucketState::Created,
        }
    }

    /// 레코드 버퍼 (가변 영역 + private 영역)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// soft 마감 시각 (ms)
    pub fn expire_time(&self) -> u64 {
        self.expire_time
    }

    /// hard 마감 시각 (ms)
    pub fn force_expire_time(&self) -> u64 {
        self.force_expire_time
    }

    /// 먼저 도래하는 마감 시각. 강제 만료 표시가 있으면 0입니다.
    pub fn deadline(&self) -> u64 {
        if self.force_expiry {
            0
        } else {
            self.expire_time.min(self.force_expire_time)
        }
    }

    /// `now` 시점에 만료 대상인지 확인합니다.
    pub fn is_due(&self, now: u64) -> bool {
        self.force_expiry || self.expire_time < now || self.force_expire_time < now
    }

    /// 키 해시
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// 관측 도메인 ID
    pub fn observation_domain_id(&self) -> u32 {
        self.observation_domain_id
    }

    /// 해시 체인에 연결되어 있는지
    pub fn in_table(&self) -> bool {
        self.in_table
    }

    /// 강제 만료 표시 여부
    pub fn force_expiry(&self) -> bool {
        self.force_expiry
    }

    /// 현재 상태
    pub fn state(&self) -> BucketState {
        self.state
    }
}

/// 아레나 슬롯
#[derive(Debug)]
struct Slot {
    generation: u32,
    bucket: Option<Bucket>,
}

/// 버킷 아레나
///
/// 해시 테이블과 수명이 같으며, 해제된 슬롯은 free 리스트로 재사용됩니다.
#[derive(Debug, Default)]
pub struct BucketPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl BucketPool {
    /// 빈 아레나를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 버킷을 아레나에 넣고 핸들을 반환합니다.
    pub fn acquire(&mut self, bucket: Bucket) -> BucketId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.bucket = Some(bucket);
            return BucketId {
                index,
                generation: slot.generation,
            };
        }

        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("bucket pool exhausted at {} slots", self.slots.len())
        });
        self.slots.push(Slot {
            generation: 0,
            bucket: Some(bucket),
        });
        BucketId {
            index,
            generation: 0,
        }
    }

    /// 버킷을 꺼내고 슬롯을 반납합니다. 소유권이 호출자에게 넘어갑니다.
    ///
    /// # Panics
    /// 핸들이 이미 해제되었거나 다른 세대이면 패닉합니다.
    pub fn release(&mut self, id: BucketId) -> Bucket {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .unwrap_or_else(|| panic!("release of stale bucket handle {id:?}"));
        let bucket = slot
            .bucket
            .take()
            .unwrap_or_else(|| panic!("double release of bucket {id:?}"));
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        bucket
    }

    /// 핸들로 버킷을 조회합니다.
    pub fn get(&self, id: BucketId) -> Option<&Bucket> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.bucket.as_ref())
    }

    /// 핸들로 버킷을 가변 조회합니다.
    pub fn get_mut(&mut self, id: BucketId) -> Option<&mut Bucket> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.bucket.as_mut())
    }

    /// 살아 있는 버킷 수
    pub fn len(&self) -> usize {
        self.live
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// 모든 버킷을 버립니다. 핸들은 모두 무효가 됩니다.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.bucket.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.live = 0;
    }
}

impl std::ops::Index<BucketId> for BucketPool {
    type Output = Bucket;

    fn index(&self, id: BucketId) -> &Bucket {
        self.get(id)
            .unwrap_or_else(|| panic!("access to stale bucket handle {id:?}"))
    }
}

impl std::ops::IndexMut<BucketId> for BucketPool {
    fn index_mut(&mut self, id: BucketId) -> &mut Bucket {
        self.get_mut(id)
            .unwrap_or_else(|| panic!("access to stale bucket handle {id:?}"))
    }
}

/// 내보내기 리스트
///
/// 생성 순서로 모든 살아 있는 버킷을 잇는 intrusive 리스트입니다.
/// 노드 링크는 [`Bucket`] 안에 있으므로 별도 할당이 없습니다.
#[derive(Debug, Default)]
pub struct ExportList {
    head: Option<BucketId>,
    tail: Option<BucketId>,
    len: usize,
}

impl ExportList {
    /// 빈 리스트를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 맨 앞 버킷
    pub fn head(&self) -> Option<BucketId> {
        self.head
    }

    /// 원소 수
    pub fn len(&self) -> usize {
        self.len
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 맨 뒤에 붙입니다.
    pub fn push_back(&mut self, pool: &mut BucketPool, id: BucketId) {
        debug_assert!(pool[id].export.is_detached() && self.head != Some(id));
        pool[id].export = Link {
            prev: self.tail,
            next: None,
        };
        match self.tail {
            Some(tail) => pool[tail].export.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// 리스트에서 떼어냅니다.
    pub fn unlink(&mut self, pool: &mut BucketPool, id: BucketId) {
        let Link { prev, next } = pool[id].export;
        match prev {
            Some(p) => pool[p].export.next = next,
            None => {
                assert_eq!(self.head, Some(id), "bucket {id:?} is not in the export list");
                self.head = next;
            }
        }
        match next {
            Some(n) => pool[n].export.prev = prev,
            None => self.tail = prev,
        }
        pool[id].export = Link::default();
        self.len -= 1;
    }

    /// 앞에서부터 핸들을 모읍니다.
    #[cfg(test)]
    pub(crate) fn ids(&self, pool: &BucketPool) -> Vec<BucketId> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            out.push(id);
            cursor = pool[id].export.next;
        }
        out
    }

    /// 리스트를 비웁니다 (링크는 아레나와 함께 버려짐).
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(hash: u32) -> Bucket {
        Bucket::new(BytesMut::zeroed(4), 0, hash, 1_000, 30_000)
    }

    #[test]
    fn acquire_and_release_reuses_slots() {
        let mut pool = BucketPool::new();
        let a = pool.acquire(bucket(1));
        let b = pool.acquire(bucket(2));
        assert_eq!(pool.len(), 2);

        let released = pool.release(a);
        assert_eq!(released.hash(), 1);
        assert!(pool.get(a).is_none());

        let c = pool.acquire(bucket(3));
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a, "reused slot must carry a new generation");
        assert_eq!(pool[c].hash(), 3);
        assert_eq!(pool[b].hash(), 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    #[should_panic(expected = "stale bucket handle")]
    fn double_release_panics() {
        let mut pool = BucketPool::new();
        let a = pool.acquire(bucket(1));
        pool.release(a);
        pool.release(a);
    }

    #[test]
    fn deadline_is_earlier_of_both() {
        let mut b = bucket(0);
        assert_eq!(b.deadline(), 1_000);
        assert!(!b.is_due(1_000));
        assert!(b.is_due(1_001));
        b.force_expiry = true;
        assert_eq!(b.deadline(), 0);
        assert!(b.is_due(0));
    }

    #[test]
    fn export_list_keeps_insertion_order() {
        let mut pool = BucketPool::new();
        let mut list = ExportList::new();
        let ids: Vec<_> = (0..4).map(|h| pool.acquire(bucket(h))).collect();
        for id in &ids {
            list.push_back(&mut pool, *id);
        }
        assert_eq!(list.ids(&pool), ids);

        list.unlink(&mut pool, ids[1]);
        list.unlink(&mut pool, ids[3]);
        assert_eq!(list.ids(&pool), vec![ids[0], ids[2]]);
        assert_eq!(list.len(), 2);

        assert_eq!(list.head(), Some(ids[0]));

        list.unlink(&mut pool, ids[0]);
        assert_eq!(list.head(), Some(ids[2]));
        list.unlink(&mut pool, ids[2]);
        assert!(list.is_empty());
        assert!(list.head().is_none());
    }
}
